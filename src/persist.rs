//! The per-repository persisted state file (spec §6): three lines,
//! `session_id`, decimal `serial`, HTTP-date `last_modified` (the last
//! line may be empty when no `Last-Modified` header was ever seen).
//!
//! Reading and writing a small text file is exactly what
//! `rrdpit::sync::{read, save}` already does for repository content;
//! this module follows the same shape (plain `std::fs`, no buffering
//! abstraction) but for the three-line record instead of an arbitrary
//! byte blob.

use std::io::Write;
use std::path::Path;

use crate::error::PersistError;
use crate::model::RepositoryState;

/// Reads the three-line state file. Per spec, a repository with no
/// prior state simply has no file yet; callers should treat a missing
/// file the same as [`RepositoryState::empty`].
pub fn read(path: &Path) -> Result<RepositoryState, PersistError> {
    let content = std::fs::read_to_string(path)?;
    let mut lines = content.lines();

    let session_id = lines
        .next()
        .ok_or_else(|| PersistError::Malformed("missing session_id line".into()))?
        .to_string();

    let serial_line = lines
        .next()
        .ok_or_else(|| PersistError::Malformed("missing serial line".into()))?;
    let serial: u64 = serial_line
        .parse()
        .map_err(|_| PersistError::Malformed(format!("invalid serial {serial_line:?}")))?;

    let last_modified = lines.next().map(str::to_string).filter(|s| !s.is_empty());

    Ok(RepositoryState {
        session_id,
        serial,
        last_modified,
    })
}

/// Atomically replaces the state file: write to a sibling temp file,
/// then rename over the target, so a crash never leaves a half-written
/// state file behind.
pub fn write(path: &Path, state: &RepositoryState) -> Result<(), PersistError> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut f = std::fs::File::create(&tmp_path)?;
        writeln!(f, "{}", state.session_id)?;
        writeln!(f, "{}", state.serial)?;
        writeln!(f, "{}", state.last_modified.as_deref().unwrap_or(""))?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_full_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.txt");
        let state = RepositoryState {
            session_id: "9a3b1c".to_string(),
            serial: 42,
            last_modified: Some("Mon, 01 Jan 2024 00:00:00 GMT".to_string()),
        };
        write(&path, &state).unwrap();
        let read_back = read(&path).unwrap();
        assert_eq!(state, read_back);
    }

    #[test]
    fn round_trips_without_last_modified() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.txt");
        let state = RepositoryState {
            session_id: "abc".to_string(),
            serial: 1,
            last_modified: None,
        };
        write(&path, &state).unwrap();
        assert_eq!(read(&path).unwrap(), state);
    }

    #[test]
    fn rejects_non_numeric_serial() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.txt");
        std::fs::write(&path, "abc\nnot-a-number\n\n").unwrap();
        assert!(matches!(read(&path), Err(PersistError::Malformed(_))));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.txt");
        assert!(matches!(read(&path), Err(PersistError::Io(_))));
    }
}

//! Shared data types from spec §3: the persisted [`RepositoryState`], the
//! notification's [`DeltaRef`] list, and the [`PublishRecord`]/
//! [`FileEvent`] pair produced by the snapshot and delta handlers.

use crate::hash::DIGEST_LEN;

/// One repository's last-known-good state, persisted atomically at the
/// end of every successful sync (spec §3, §6 `SESSION` message and the
/// three-line state file).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RepositoryState {
    pub session_id: String,
    pub serial: u64,
    pub last_modified: Option<String>,
}

impl RepositoryState {
    pub fn empty() -> Self {
        RepositoryState::default()
    }

    /// True for the "never synced" state: no session id recorded yet.
    /// Spec §4.3 step 2 treats this (or `serial == 0`) as forcing a
    /// snapshot.
    pub fn is_unset(&self) -> bool {
        self.session_id.is_empty() || self.serial == 0
    }
}

/// A `<delta>` reference as listed in a notification, after the scope
/// automaton has validated its attributes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeltaRef {
    pub serial: u64,
    pub uri: String,
    pub hash: [u8; DIGEST_LEN],
}

/// The three kinds of record a snapshot or delta document can contain
/// (spec §3 `PublishRecord`).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordKind {
    Add,
    Update,
    Withdraw,
}

/// A `<publish>`/`<withdraw>` record, accumulated while its element is
/// open and finalized (and emitted) on the matching end tag.
#[derive(Clone, Debug)]
pub struct PublishRecord {
    pub uri: String,
    pub kind: RecordKind,
    pub expected_hash: Option<[u8; DIGEST_LEN]>,
    /// Accumulated base64 text; absent (and ignored) for `Withdraw`.
    pub data: Vec<u8>,
}

impl PublishRecord {
    pub fn new_publish(uri: String, expected_hash: Option<[u8; DIGEST_LEN]>) -> Self {
        let kind = if expected_hash.is_some() {
            RecordKind::Update
        } else {
            RecordKind::Add
        };
        PublishRecord {
            uri,
            kind,
            expected_hash,
            data: Vec::new(),
        }
    }

    pub fn new_withdraw(uri: String, hash: [u8; DIGEST_LEN]) -> Self {
        PublishRecord {
            uri,
            kind: RecordKind::Withdraw,
            expected_hash: Some(hash),
            data: Vec::new(),
        }
    }
}

/// One decoded publish/withdraw record, ready to be sent to the parent
/// (spec §4.4, §6 `FILE` message).
#[derive(Clone, Debug)]
pub struct FileEvent {
    pub session_id: u64,
    pub kind: RecordKind,
    pub uri: String,
    pub expected_hash: Option<[u8; DIGEST_LEN]>,
    pub data: Option<Vec<u8>>,
}

/// The next action to take after a notification has been parsed (spec
/// §4.3).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Plan {
    /// Plan not yet decided: the delta list hasn't been fully parsed.
    Pending,
    None,
    Deltas,
    Snapshot,
    Error,
}

/// What a session is currently fetching (spec §3 `Session.task`).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Task {
    Notification,
    Snapshot,
    Delta,
}

/// A session's position in the state machine (spec §3 `Session.phase`,
/// §4.1).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Req,
    Waiting,
    Parsing,
    Parsed,
    Error,
    Done,
}

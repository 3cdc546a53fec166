//! The control channel message protocol (spec §6): what the worker
//! receives from the parent process (`ToWorker`) and what it sends back
//! (`ToParent`). Every message carries the numeric id of the session it
//! concerns.

use std::pin::Pin;

use tokio::io::AsyncRead;

use crate::model::RecordKind;

/// The body of a fetch in progress, handed over once the parent has a
/// response stream ready to read.
pub type FetchStream = Pin<Box<dyn AsyncRead + Send>>;

/// The abstract boundary between a [`crate::scheduler::Scheduler`] and
/// whatever embeds it: a pair of channels carrying [`ToWorker`] in and
/// [`ToParent`] out. Framing (fd passing, wire encoding) is out of scope
/// (spec §1) — this is just the in-process FIFO queue §5 describes; a
/// host that needs an actual transport wires these channels to one.
pub type ControlChannel = (
    tokio::sync::mpsc::Sender<ToParent>,
    tokio::sync::mpsc::Receiver<ToWorker>,
);

/// Sent by the parent to drive a session forward. Not `Clone`: `HttpIni`
/// carries the response stream itself. Not `Debug`: same reason.
pub enum ToWorker {
    /// Begin tracking a new session: its notification URI, local object
    /// path, and last-persisted [`crate::model::RepositoryState`].
    Start {
        id: u64,
        notify_uri: String,
        local_path: std::path::PathBuf,
        repository: crate::model::RepositoryState,
    },
    /// The fetch the session is waiting on has started; `stream` yields
    /// the response body.
    HttpIni { id: u64, stream: FetchStream },
    /// The fetch concluded: final HTTP status and, for a notification
    /// fetch, any `Last-Modified` response header.
    HttpFin {
        id: u64,
        status: i32,
        last_modified: Option<String>,
    },
    /// One previously emitted `FILE` message was applied (or failed to
    /// apply) by the parent.
    FileAck { id: u64, ok: bool },
}

/// Sent by the worker to request action or report progress.
#[derive(Clone, Debug)]
pub enum ToParent {
    /// Request that the parent fetch `uri`, optionally as a conditional
    /// GET.
    HttpReq {
        id: u64,
        uri: String,
        if_modified_since: Option<String>,
    },
    /// One publish/update/withdraw record, decoded and ready to apply.
    File {
        id: u64,
        kind: RecordKind,
        uri: String,
        expected_hash: Option<[u8; crate::hash::DIGEST_LEN]>,
        data: Option<Vec<u8>>,
    },
    /// The session reached a new persisted state; the parent should
    /// write it out before any subsequent `END`.
    Session {
        id: u64,
        state: crate::model::RepositoryState,
    },
    /// The session has finished: `ok` reports overall success.
    End { id: u64, ok: bool },
}

impl From<crate::model::FileEvent> for ToParent {
    fn from(event: crate::model::FileEvent) -> Self {
        ToParent::File {
            id: event.session_id,
            kind: event.kind,
            uri: event.uri,
            expected_hash: event.expected_hash,
            data: event.data,
        }
    }
}

//! Error classification shared across the worker core.
//!
//! Every module defines its own narrow `Error` type (see `xml.rs`,
//! `notification.rs`, `snapshot.rs`, `delta.rs`). [`SessionError`] is the
//! classification the [`crate::session::Session`] state machine and the
//! [`crate::scheduler::Scheduler`] actually switch on: it groups every
//! concrete error into one of the five kinds from the spec and tells the
//! scheduler whether the failure is confined to one session or fatal to
//! the whole worker.

use std::fmt;

/// The five error kinds distinguished by the propagation policy.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum SessionError {
    /// Malformed XML, a schema violation, a bad attribute, or a base64
    /// decode failure.
    #[display("parse error: {_0}")]
    Parse(String),

    /// The finalized digest over a snapshot or delta body did not match
    /// the hash advertised for it.
    #[display("hash mismatch for {_0}")]
    HashMismatch(String),

    /// A fetch came back with an unexpected HTTP status, or the stream
    /// itself failed to read.
    #[display("transport error: {_0}")]
    Transport(String),

    /// A message arrived that the session could not make sense of: an
    /// unknown session id, a stream handed over when none was expected,
    /// or similar. Fatal to the worker.
    #[display("protocol error: {_0}")]
    Protocol(String),

    /// The session was in a phase that did not admit the event that just
    /// arrived. Fatal to the worker: it means the state machine has a
    /// bug.
    #[display("internal invariant violated: {_0}")]
    Internal(String),
}

impl SessionError {
    /// `Parse`, `HashMismatch`, and `Transport` are confined to the
    /// session that raised them and drive the failure fallback in
    /// [`crate::session`]. `Protocol` and `Internal` are fatal: the
    /// worker exits.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Protocol(_) | SessionError::Internal(_))
    }
}

impl std::error::Error for SessionError {}

impl From<crate::xml::XmlError> for SessionError {
    fn from(e: crate::xml::XmlError) -> Self {
        SessionError::Parse(e.to_string())
    }
}

impl From<base64::DecodeError> for SessionError {
    fn from(e: base64::DecodeError) -> Self {
        SessionError::Parse(format!("base64: {e}"))
    }
}

/// Error returned by [`crate::persist`] when the three-line state file
/// cannot be parsed. Kept distinct from [`SessionError`] because a bad
/// state file is a `START`-time concern, not a mid-sync one.
#[derive(Clone, Debug, Display)]
pub enum PersistError {
    #[display("cannot read session state: {_0}")]
    Io(String),

    #[display("malformed session state file: {_0}")]
    Malformed(String),
}

impl std::error::Error for PersistError {}

impl From<std::io::Error> for PersistError {
    fn from(e: std::io::Error) -> Self {
        PersistError::Io(e.to_string())
    }
}

/// A worker-fatal error: the process should stop servicing sessions and
/// exit with an error, per spec §7 kinds (d) and (e).
#[derive(Debug)]
pub struct FatalError(pub String);

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fatal worker error: {}", self.0)
    }
}

impl std::error::Error for FatalError {}

impl From<SessionError> for FatalError {
    fn from(e: SessionError) -> Self {
        FatalError(e.to_string())
    }
}

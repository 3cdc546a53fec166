//! The per-session state machine (spec §4.1): drives NOTIFICATION →
//! {SNAPSHOT | DELTA*} → DONE, owning the session's parser, handler, and
//! hasher for its lifetime (spec §3 invariant).

use std::collections::VecDeque;
use std::path::PathBuf;

use log::{debug, warn};

use crate::delta::{self, DeltaHandler};
use crate::error::SessionError;
use crate::hash::Hasher;
use crate::model::{FileEvent, Phase, Plan, RepositoryState, Task};
use crate::notification::{self, NotificationDoc, NotificationHandler};
use crate::snapshot::{self, SnapshotHandler};
use crate::xml::{ElementSink, Lexer, XmlError};

/// A request the session wants the scheduler to forward to the parent
/// (spec §6 `HTTP_REQ`).
#[derive(Clone, Debug)]
pub struct FetchRequest {
    pub uri: String,
    pub if_modified_since: Option<String>,
}

/// What the scheduler should do after a completion-logic pass.
pub enum SessionOutcome {
    /// More fetching to do; the session is already back in `Phase::Req`.
    Continue,
    /// The session is finished. `persist` is `Some` exactly when a new
    /// `SESSION` message should be sent before `END`.
    Done {
        ok: bool,
        persist: Option<RepositoryState>,
    },
}

enum HandlerSlot {
    None,
    Notification(NotificationHandler),
    Snapshot(SnapshotHandler),
    Delta(DeltaHandler),
}

pub struct Session {
    pub id: u64,
    pub notify_uri: String,
    #[allow(dead_code)] // carried per the data model; not read by the core itself
    pub local_path: PathBuf,

    pub repository: RepositoryState,
    current: RepositoryState,

    pub task: Task,
    pub phase: Phase,

    expected_hash: Option<[u8; 32]>,
    hasher: Option<Hasher>,
    hash_ok: bool,

    lexer: Option<Lexer>,
    handler: HandlerSlot,

    pub file_pending: u64,
    pub file_failed: u64,

    fetch_result: Option<(i32, Option<String>)>,

    /// Set once the notification has been parsed; carried for the
    /// lifetime of the session so snapshot/delta fallback can rebuild
    /// requests and so the final `SESSION` message uses the right
    /// session id / serial / last-modified.
    notification: Option<NotificationDoc>,
    notification_last_modified: Option<String>,
    pending_deltas: VecDeque<crate::model::DeltaRef>,
}

impl Session {
    pub fn new(
        id: u64,
        local_path: PathBuf,
        notify_uri: String,
        repository: RepositoryState,
    ) -> Self {
        let current = repository.clone();
        Session {
            id,
            notify_uri,
            local_path,
            repository,
            current,
            task: Task::Notification,
            phase: Phase::Req,
            expected_hash: None,
            hasher: None,
            hash_ok: true,
            lexer: None,
            handler: HandlerSlot::None,
            file_pending: 0,
            file_failed: 0,
            fetch_result: None,
            notification: None,
            notification_last_modified: None,
            pending_deltas: VecDeque::new(),
        }
    }

    /// Phase `Req` → `Waiting`: synthesizes the next fetch request (spec
    /// §4.1 first table row).
    pub fn build_request(&mut self) -> FetchRequest {
        assert_eq!(self.phase, Phase::Req, "build_request called out of phase");
        let req = match self.task {
            Task::Notification => FetchRequest {
                uri: self.notify_uri.clone(),
                if_modified_since: self.repository.last_modified.clone(),
            },
            Task::Snapshot => {
                let doc = self.notification.as_ref().expect("snapshot task implies a parsed notification");
                FetchRequest {
                    uri: doc.snapshot_uri.clone(),
                    if_modified_since: None,
                }
            }
            Task::Delta => {
                let next = self.pending_deltas.front().expect("delta task implies a pending delta");
                FetchRequest {
                    uri: next.uri.clone(),
                    if_modified_since: None,
                }
            }
        };
        self.phase = Phase::Waiting;
        req
    }

    /// `WAITING` → `PARSING`: a readable stream has been attached.
    pub fn attach_stream(&mut self) -> Result<(), SessionError> {
        if self.phase != Phase::Waiting {
            return Err(SessionError::Internal(format!(
                "attach_stream in phase {:?}",
                self.phase
            )));
        }
        self.lexer = Some(Lexer::new());
        self.hash_ok = true;
        match self.task {
            Task::Notification => {
                self.hasher = None;
                self.expected_hash = None;
                self.handler = HandlerSlot::Notification(NotificationHandler::new(self.repository.clone()));
            }
            Task::Snapshot => {
                let doc = self.notification.as_ref().expect("snapshot task implies a parsed notification");
                self.hasher = Some(Hasher::new());
                self.expected_hash = Some(doc.snapshot_hash);
                let expected = snapshot::ExpectedHeader {
                    version: doc.version,
                    session_id: doc.session_id.clone(),
                    serial: doc.serial,
                };
                self.handler = HandlerSlot::Snapshot(SnapshotHandler::new(self.id, expected));
            }
            Task::Delta => {
                let doc = self.notification.as_ref().expect("delta task implies a parsed notification");
                let next = self.pending_deltas.front().expect("delta task implies a pending delta");
                self.hasher = Some(Hasher::new());
                self.expected_hash = Some(next.hash);
                let expected = delta::ExpectedHeader {
                    version: doc.version,
                    session_id: doc.session_id.clone(),
                    serial: next.serial,
                };
                self.handler = HandlerSlot::Delta(DeltaHandler::new(self.id, expected));
            }
        }
        self.phase = Phase::Parsing;
        Ok(())
    }

    /// Bytes read off the attached stream. Returns any file events the
    /// handler finalized while consuming them. A parser failure moves
    /// the session to `Phase::Error` instead of propagating — per spec
    /// §4.1, the failure is only acted on once the fetch concludes.
    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Vec<FileEvent> {
        if self.phase != Phase::Parsing {
            return Vec::new(); // ERROR: drain only
        }
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(bytes);
        }
        let lexer = self.lexer.as_mut().expect("Parsing implies an open lexer");
        let result = match &mut self.handler {
            HandlerSlot::None => Ok(()),
            HandlerSlot::Notification(h) => lexer.feed(bytes, h),
            HandlerSlot::Snapshot(h) => lexer.feed(bytes, h),
            HandlerSlot::Delta(h) => lexer.feed(bytes, h),
        };
        if let Err(e) = result {
            warn!("session {}: parse error: {e}", self.id);
            self.phase = Phase::Error;
        }
        self.drain_events()
    }

    fn drain_events(&mut self) -> Vec<FileEvent> {
        let events = match &mut self.handler {
            HandlerSlot::Snapshot(h) => h.take_events(),
            HandlerSlot::Delta(h) => h.take_events(),
            _ => Vec::new(),
        };
        self.file_pending += events.len() as u64;
        events
    }

    /// `PARSING`/`ERROR` → `PARSED`/`ERROR` on stream EOF (spec §4.1).
    /// Returns a completion outcome if `FetchResult` had already arrived
    /// and every emitted file has been acknowledged.
    pub fn on_eof(&mut self) -> Option<SessionOutcome> {
        if self.phase != Phase::Parsing {
            return self.maybe_complete(); // already ERROR: drain only
        }
        if let Some(hasher) = self.hasher.take() {
            let digest = hasher.finish();
            match self.expected_hash {
                Some(expected) if expected == digest => {}
                Some(_) => {
                    warn!("session {}: hash mismatch", self.id);
                    self.hash_ok = false;
                }
                None => {
                    self.phase = Phase::Error;
                    warn!("session {}: internal: no expected hash set", self.id);
                    return self.maybe_complete();
                }
            }
        }
        self.phase = if self.hash_ok {
            Phase::Parsed
        } else {
            Phase::Error
        };
        self.maybe_complete()
    }

    /// The attached stream itself failed to read (spec §7 transport
    /// error). Treated the same as a parse failure: confined to this
    /// session, subject to the same delta→snapshot fallback.
    pub fn fail_stream(&mut self) -> Option<SessionOutcome> {
        if matches!(self.phase, Phase::Parsing) {
            self.phase = Phase::Error;
        }
        self.maybe_complete()
    }

    /// `FetchResult` from the parent; may arrive before or after the
    /// matching stream EOF (spec §5). Returns `Some` once both have
    /// occurred and `file_pending` has drained to zero.
    pub fn on_fetch_result(&mut self, status: i32, last_modified: Option<String>) -> Option<SessionOutcome> {
        self.fetch_result = Some((status, last_modified));
        self.maybe_complete()
    }

    /// One previously emitted `FileEvent` was acknowledged.
    pub fn on_file_ack(&mut self, ok: bool) -> Option<SessionOutcome> {
        if !ok {
            self.file_failed += 1;
        }
        self.file_pending = self.file_pending.saturating_sub(1);
        self.maybe_complete()
    }

    fn maybe_complete(&mut self) -> Option<SessionOutcome> {
        if self.file_pending != 0 {
            return None;
        }
        if !matches!(self.phase, Phase::Parsed | Phase::Error) {
            return None; // EOF hasn't happened locally yet
        }
        let (status, last_modified) = self.fetch_result.take()?;
        Some(self.run_completion(status, last_modified))
    }

    fn run_completion(&mut self, status: i32, last_modified: Option<String>) -> SessionOutcome {
        if self.phase == Phase::Error {
            return self.fail();
        }
        if status == 304 && self.task == Task::Notification {
            debug!("session {}: notification not modified", self.id);
            return SessionOutcome::Done { ok: true, persist: None };
        }
        if status != 200 {
            warn!("session {}: fetch failed with status {status}", self.id);
            return self.fail();
        }
        if let Err(e) = self.finalize_parser() {
            warn!("session {}: parser finalize failed: {e}", self.id);
            return self.fail();
        }
        if self.file_failed > 0 {
            warn!("session {}: {} file(s) failed to apply", self.id, self.file_failed);
            return self.fail();
        }
        match self.task {
            Task::Notification => {
                self.notification_last_modified = last_modified;
                self.complete_notification()
            }
            Task::Snapshot => self.finish_success(),
            Task::Delta => {
                self.pending_deltas.pop_front();
                if self.pending_deltas.is_empty() {
                    self.finish_success()
                } else {
                    self.phase = Phase::Req;
                    SessionOutcome::Continue
                }
            }
        }
    }

    fn finalize_parser(&mut self) -> Result<(), XmlError> {
        let mut lexer = self.lexer.take().expect("completion implies an opened lexer");
        let sink: &mut dyn ElementSink = match &mut self.handler {
            HandlerSlot::Notification(h) => h,
            HandlerSlot::Snapshot(h) => h,
            HandlerSlot::Delta(h) => h,
            HandlerSlot::None => return Ok(()),
        };
        lexer.finish(sink)
    }

    fn complete_notification(&mut self) -> SessionOutcome {
        let handler = match std::mem::replace(&mut self.handler, HandlerSlot::None) {
            HandlerSlot::Notification(h) => h,
            _ => {
                return self.fatal_outcome("complete_notification without a notification handler")
            }
        };
        let plan = handler.plan();
        let doc = handler.into_doc();
        match plan {
            Plan::None => {
                self.notification = Some(doc);
                self.finish_success()
            }
            Plan::Snapshot => {
                self.pending_deltas.clear();
                self.notification = Some(doc);
                self.task = Task::Snapshot;
                self.phase = Phase::Req;
                SessionOutcome::Continue
            }
            Plan::Deltas => {
                self.pending_deltas = doc.deltas.iter().cloned().collect();
                self.notification = Some(doc);
                self.task = Task::Delta;
                self.phase = Phase::Req;
                SessionOutcome::Continue
            }
            Plan::Error | Plan::Pending => {
                warn!("session {}: notification plan is {:?}", self.id, plan);
                SessionOutcome::Done { ok: false, persist: None }
            }
        }
    }

    /// Failure fallback (spec §7): a delta-phase failure retries once
    /// with a full snapshot; any other failure ends the session.
    fn fail(&mut self) -> SessionOutcome {
        if self.task == Task::Delta {
            debug!("session {}: delta fetch failed, falling back to snapshot", self.id);
            self.pending_deltas.clear();
            self.file_failed = 0;
            self.task = Task::Snapshot;
            self.phase = Phase::Req;
            SessionOutcome::Continue
        } else {
            SessionOutcome::Done { ok: false, persist: None }
        }
    }

    fn finish_success(&mut self) -> SessionOutcome {
        let state = match &self.notification {
            Some(doc) => RepositoryState {
                session_id: doc.session_id.clone(),
                serial: doc.serial,
                last_modified: self.notification_last_modified.clone(),
            },
            None => self.current.clone(),
        };
        self.current = state.clone();
        SessionOutcome::Done {
            ok: true,
            persist: Some(state),
        }
    }

    fn fatal_outcome(&self, msg: &str) -> SessionOutcome {
        warn!("session {}: {msg}", self.id);
        SessionOutcome::Done { ok: false, persist: None }
    }
}

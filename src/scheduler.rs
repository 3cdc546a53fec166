//! The event loop (spec §4.5, §5): one `tokio` task owns every session,
//! multiplexing their attached fetch streams with `FuturesUnordered`
//! rather than spawning a task per session — keeping the single-threaded,
//! deterministic-ordering contract the spec requires.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use log::{debug, error, warn};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::channel::{FetchStream, ToParent, ToWorker};
use crate::config::Config;
use crate::error::FatalError;
use crate::model::Phase;
use crate::session::{Session, SessionOutcome};

type ReadResult = (u64, FetchStream, std::io::Result<Vec<u8>>);
type ReadFuture = Pin<Box<dyn std::future::Future<Output = ReadResult> + Send>>;

async fn read_chunk(id: u64, mut stream: FetchStream, buf_size: usize) -> ReadResult {
    let mut buf = vec![0u8; buf_size];
    match stream.read(&mut buf).await {
        Ok(n) => {
            buf.truncate(n);
            (id, stream, Ok(buf))
        }
        Err(e) => (id, stream, Err(e)),
    }
}

/// Owns every live [`Session`] and the outgoing message queue destined
/// for the parent (spec §5 "outgoing queue").
pub struct Scheduler {
    config: Config,
    sessions: HashMap<u64, Session>,
    /// Session ids in `Phase::Req` waiting for a free fetch slot.
    pending_req: VecDeque<u64>,
    outbox: VecDeque<ToParent>,
}

impl Scheduler {
    pub fn new(config: Config) -> Self {
        Scheduler {
            config,
            sessions: HashMap::new(),
            pending_req: VecDeque::new(),
            outbox: VecDeque::new(),
        }
    }

    /// Runs until `inbound` closes. Every message the session logic
    /// produces is forwarded to `outbound` before the loop waits again.
    /// Returns once the control channel closes normally; a `Protocol` or
    /// `Internal` [`crate::error::SessionError`] is fatal and returned as
    /// an `Err`.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<ToWorker>,
        outbound: mpsc::Sender<ToParent>,
    ) -> Result<(), FatalError> {
        let mut reads: FuturesUnordered<ReadFuture> = FuturesUnordered::new();

        loop {
            tokio::select! {
                msg = inbound.recv() => {
                    match msg {
                        Some(msg) => self.handle_inbound(msg, &mut reads)?,
                        None => break,
                    }
                }
                Some((id, stream, result)) = reads.next(), if !reads.is_empty() => {
                    self.handle_read(id, stream, result, &mut reads);
                }
            }
            self.flush_outbox(&outbound).await;
        }
        self.flush_outbox(&outbound).await;
        Ok(())
    }

    fn handle_inbound(
        &mut self,
        msg: ToWorker,
        reads: &mut FuturesUnordered<ReadFuture>,
    ) -> Result<(), FatalError> {
        match msg {
            ToWorker::Start { id, notify_uri, local_path, repository } => {
                debug!("session {id}: started for {notify_uri}");
                let session = Session::new(id, local_path, notify_uri, repository);
                self.sessions.insert(id, session);
                self.pending_req.push_back(id);
            }
            ToWorker::HttpIni { id, stream } => {
                let session = self.sessions.get_mut(&id).ok_or_else(|| {
                    FatalError(format!("HttpIni for unknown session {id}"))
                })?;
                session
                    .attach_stream()
                    .map_err(|e| FatalError(e.to_string()))?;
                reads.push(Box::pin(read_chunk(id, stream, self.config.read_buffer_size)));
            }
            ToWorker::HttpFin { id, status, last_modified } => {
                let session = self.sessions.get_mut(&id).ok_or_else(|| {
                    FatalError(format!("HttpFin for unknown session {id}"))
                })?;
                if let Some(outcome) = session.on_fetch_result(status, last_modified) {
                    self.settle(id, outcome);
                }
            }
            ToWorker::FileAck { id, ok } => {
                let session = self.sessions.get_mut(&id).ok_or_else(|| {
                    FatalError(format!("FileAck for unknown session {id}"))
                })?;
                if let Some(outcome) = session.on_file_ack(ok) {
                    self.settle(id, outcome);
                }
            }
        }
        self.pump();
        Ok(())
    }

    fn handle_read(
        &mut self,
        id: u64,
        stream: FetchStream,
        result: std::io::Result<Vec<u8>>,
        reads: &mut FuturesUnordered<ReadFuture>,
    ) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return; // session already reaped; drop the stream
        };
        match result {
            Ok(bytes) if bytes.is_empty() => {
                if let Some(outcome) = session.on_eof() {
                    self.settle(id, outcome);
                }
            }
            Ok(bytes) => {
                if session.phase == Phase::Parsing {
                    for event in session.feed_bytes(&bytes) {
                        self.outbox.push_back(event.into());
                    }
                }
                reads.push(Box::pin(read_chunk(id, stream, self.config.read_buffer_size)));
            }
            Err(e) => {
                warn!("session {id}: stream read failed: {e}");
                if let Some(outcome) = session.fail_stream() {
                    self.settle(id, outcome);
                }
            }
        }
        self.pump();
    }

    fn settle(&mut self, id: u64, outcome: SessionOutcome) {
        match outcome {
            SessionOutcome::Continue => self.pending_req.push_back(id),
            SessionOutcome::Done { ok, persist } => {
                if let Some(state) = persist {
                    self.outbox.push_back(ToParent::Session { id, state });
                }
                debug!("session {id}: done, ok={ok}");
                self.outbox.push_back(ToParent::End { id, ok });
                self.sessions.remove(&id);
            }
        }
    }

    /// Dispatches as many queued `Phase::Req` sessions as the configured
    /// concurrency cap allows (spec §4.5 `MAX_SESSIONS`).
    fn pump(&mut self) {
        let active = self
            .sessions
            .values()
            .filter(|s| matches!(s.phase, Phase::Waiting | Phase::Parsing))
            .count();
        let mut free = self.config.max_sessions.saturating_sub(active);
        while free > 0 {
            let Some(id) = self.pending_req.pop_front() else { break };
            let Some(session) = self.sessions.get_mut(&id) else { continue };
            if session.phase != Phase::Req {
                continue; // stale entry; already dispatched or reaped
            }
            let req = session.build_request();
            self.outbox.push_back(ToParent::HttpReq {
                id,
                uri: req.uri,
                if_modified_since: req.if_modified_since,
            });
            free -= 1;
        }
    }

    async fn flush_outbox(&mut self, outbound: &mpsc::Sender<ToParent>) {
        while let Some(msg) = self.outbox.pop_front() {
            if outbound.send(msg).await.is_err() {
                error!("outbound control channel closed; dropping remaining messages");
                self.outbox.clear();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RepositoryState;

    #[tokio::test]
    async fn pump_respects_max_sessions() {
        let mut scheduler = Scheduler::new(Config { max_sessions: 1, read_buffer_size: 1024 });
        let mut reads = FuturesUnordered::new();
        scheduler
            .handle_inbound(
                ToWorker::Start {
                    id: 1,
                    notify_uri: "https://a/notification.xml".into(),
                    local_path: "/tmp/a".into(),
                    repository: RepositoryState::empty(),
                },
                &mut reads,
            )
            .unwrap();
        scheduler
            .handle_inbound(
                ToWorker::Start {
                    id: 2,
                    notify_uri: "https://b/notification.xml".into(),
                    local_path: "/tmp/b".into(),
                    repository: RepositoryState::empty(),
                },
                &mut reads,
            )
            .unwrap();

        let reqs: Vec<_> = scheduler
            .outbox
            .iter()
            .filter(|m| matches!(m, ToParent::HttpReq { .. }))
            .collect();
        assert_eq!(reqs.len(), 1);
        assert_eq!(scheduler.pending_req.len(), 1);
    }

    #[tokio::test]
    async fn unknown_session_in_http_fin_is_fatal() {
        let mut scheduler = Scheduler::new(Config::default());
        let mut reads = FuturesUnordered::new();
        let result = scheduler.handle_inbound(
            ToWorker::HttpFin { id: 99, status: 200, last_modified: None },
            &mut reads,
        );
        assert!(result.is_err());
    }
}

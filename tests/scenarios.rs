//! End-to-end scenarios (spec §8) driven against a real `Scheduler`,
//! using `tokio::io::duplex` as the fetch-stream transport: the test
//! plays the role of "the parent", writing response bytes into one end
//! of a duplex pipe and handing the other end over via `HttpIni`.

use std::collections::HashMap;
use std::path::PathBuf;

use base64::Engine;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use rrdp_worker::channel::{ToParent, ToWorker};
use rrdp_worker::config::Config;
use rrdp_worker::hash::{encode_hex_hash, Hasher};
use rrdp_worker::model::RepositoryState;
use rrdp_worker::scheduler::Scheduler;

const NS: &str = "http://www.ripe.net/rpki/rrdp";

fn b64(s: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(s)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Hasher::new();
    h.update(bytes);
    encode_hex_hash(&h.finish())
}

/// Drives one session through a single notification-only fetch (no
/// deltas, no snapshot) and returns every `ToParent` message it produced.
async fn run_single_fetch(notification_body: &[u8], repository: RepositoryState) -> Vec<ToParent> {
    let (to_worker_tx, to_worker_rx) = mpsc::channel(32);
    let (to_parent_tx, mut to_parent_rx) = mpsc::channel(32);

    let scheduler = Scheduler::new(Config::default());
    let scheduler_task = tokio::spawn(scheduler.run(to_worker_rx, to_parent_tx));

    to_worker_tx
        .send(ToWorker::Start {
            id: 1,
            notify_uri: "https://example.test/notification.xml".into(),
            local_path: PathBuf::from("/tmp/repo"),
            repository,
        })
        .await
        .unwrap();

    let mut received = Vec::new();
    let mut body = Some(notification_body.to_vec());

    loop {
        match to_parent_rx.recv().await {
            Some(ToParent::HttpReq { id, .. }) => {
                let (mut writer, reader) = tokio::io::duplex(4096);
                to_worker_tx
                    .send(ToWorker::HttpIni { id, stream: Box::pin(reader) })
                    .await
                    .unwrap();
                let chunk = body.take().unwrap_or_default();
                writer.write_all(&chunk).await.unwrap();
                writer.shutdown().await.unwrap();
                drop(writer);
                to_worker_tx
                    .send(ToWorker::HttpFin { id, status: 200, last_modified: Some("now".into()) })
                    .await
                    .unwrap();
            }
            Some(ToParent::File { id, .. }) => {
                to_worker_tx.send(ToWorker::FileAck { id, ok: true }).await.unwrap();
            }
            Some(msg @ ToParent::Session { .. }) => received.push(msg),
            Some(msg @ ToParent::End { .. }) => {
                received.push(msg);
                break;
            }
            None => break,
        }
    }

    drop(to_worker_tx);
    scheduler_task.await.unwrap().unwrap();
    received
}

#[tokio::test]
async fn s1_up_to_date_notification_ends_without_session_message() {
    let repo = RepositoryState { session_id: "A".into(), serial: 5, last_modified: None };
    let notif = format!(
        r#"<notification xmlns="{NS}" version="1" session_id="A" serial="5"><snapshot uri="https://example.test/s.xml" hash="{}"/></notification>"#,
        "a".repeat(64)
    );
    let msgs = run_single_fetch(notif.as_bytes(), repo).await;
    assert!(!msgs.iter().any(|m| matches!(m, ToParent::Session { .. })));
    assert!(matches!(msgs.last(), Some(ToParent::End { ok: true, .. })));
}

#[tokio::test]
async fn s2_backwards_serial_ends_in_failure() {
    let repo = RepositoryState { session_id: "A".into(), serial: 10, last_modified: None };
    let notif = format!(
        r#"<notification xmlns="{NS}" version="1" session_id="A" serial="3"><snapshot uri="https://example.test/s.xml" hash="{}"/></notification>"#,
        "a".repeat(64)
    );
    let msgs = run_single_fetch(notif.as_bytes(), repo).await;
    assert!(matches!(msgs.last(), Some(ToParent::End { ok: false, .. })));
}

/// S3/S6: a full two-fetch chain (notification → snapshot) producing
/// `FILE` messages and a final persisted `SESSION` + successful `END`.
#[tokio::test]
async fn s3_fresh_repository_pulls_full_snapshot() {
    let snapshot_body = format!(
        r#"<snapshot xmlns="{NS}" version="1" session_id="A" serial="1"><publish uri="rsync://example.test/1.cer">{}</publish></snapshot>"#,
        b64("hello")
    );
    let snapshot_hash = sha256_hex(snapshot_body.as_bytes());
    let notif = format!(
        r#"<notification xmlns="{NS}" version="1" session_id="A" serial="1"><snapshot uri="https://example.test/s.xml" hash="{snapshot_hash}"/></notification>"#
    );

    let (to_worker_tx, to_worker_rx) = mpsc::channel(32);
    let (to_parent_tx, mut to_parent_rx) = mpsc::channel(32);
    let scheduler = Scheduler::new(Config::default());
    let scheduler_task = tokio::spawn(scheduler.run(to_worker_rx, to_parent_tx));

    to_worker_tx
        .send(ToWorker::Start {
            id: 7,
            notify_uri: "https://example.test/notification.xml".into(),
            local_path: PathBuf::from("/tmp/repo"),
            repository: RepositoryState::empty(),
        })
        .await
        .unwrap();

    let mut bodies: HashMap<&str, Vec<u8>> = HashMap::new();
    bodies.insert("https://example.test/notification.xml", notif.into_bytes());
    bodies.insert("https://example.test/s.xml", snapshot_body.into_bytes());

    let mut files_seen = 0;
    let mut ended_ok = None;

    loop {
        match to_parent_rx.recv().await {
            Some(ToParent::HttpReq { id, uri, .. }) => {
                let (mut writer, reader) = tokio::io::duplex(4096);
                to_worker_tx.send(ToWorker::HttpIni { id, stream: Box::pin(reader) }).await.unwrap();
                let chunk = bodies.remove(uri.as_str()).expect("unexpected uri requested");
                writer.write_all(&chunk).await.unwrap();
                writer.shutdown().await.unwrap();
                drop(writer);
                to_worker_tx.send(ToWorker::HttpFin { id, status: 200, last_modified: None }).await.unwrap();
            }
            Some(ToParent::File { id, .. }) => {
                files_seen += 1;
                to_worker_tx.send(ToWorker::FileAck { id, ok: true }).await.unwrap();
            }
            Some(ToParent::Session { state, .. }) => {
                assert_eq!(state.session_id, "A");
                assert_eq!(state.serial, 1);
            }
            Some(ToParent::End { ok, .. }) => {
                ended_ok = Some(ok);
                break;
            }
            None => break,
        }
    }

    drop(to_worker_tx);
    scheduler_task.await.unwrap().unwrap();

    assert_eq!(files_seen, 1);
    assert_eq!(ended_ok, Some(true));
}

/// S5: a delta whose body hashes to something other than the
/// notification's advertised digest falls back to a full snapshot fetch
/// (RFC 8182) and still completes the session successfully.
#[tokio::test]
async fn s5_delta_hash_mismatch_falls_back_to_snapshot_and_succeeds() {
    let snapshot_body = format!(
        r#"<snapshot xmlns="{NS}" version="1" session_id="A" serial="6"><publish uri="rsync://example.test/1.cer">{}</publish></snapshot>"#,
        b64("hello")
    );
    let snapshot_hash = sha256_hex(snapshot_body.as_bytes());

    // Well-formed delta document, but its advertised hash (all zeros)
    // will not match the SHA-256 actually computed over its bytes.
    let delta_body = format!(
        r#"<delta xmlns="{NS}" version="1" session_id="A" serial="6"><publish uri="rsync://example.test/2.cer">{}</publish></delta>"#,
        b64("world")
    );
    let bogus_delta_hash = "0".repeat(64);

    let notif = format!(
        r#"<notification xmlns="{NS}" version="1" session_id="A" serial="6"><snapshot uri="https://example.test/s.xml" hash="{snapshot_hash}"/><delta serial="6" uri="https://example.test/6.xml" hash="{bogus_delta_hash}"/></notification>"#
    );

    let (to_worker_tx, to_worker_rx) = mpsc::channel(32);
    let (to_parent_tx, mut to_parent_rx) = mpsc::channel(32);
    let scheduler = Scheduler::new(Config::default());
    let scheduler_task = tokio::spawn(scheduler.run(to_worker_rx, to_parent_tx));

    to_worker_tx
        .send(ToWorker::Start {
            id: 5,
            notify_uri: "https://example.test/notification.xml".into(),
            local_path: PathBuf::from("/tmp/repo"),
            repository: RepositoryState { session_id: "A".into(), serial: 5, last_modified: None },
        })
        .await
        .unwrap();

    let mut bodies: HashMap<&str, Vec<u8>> = HashMap::new();
    bodies.insert("https://example.test/notification.xml", notif.into_bytes());
    bodies.insert("https://example.test/6.xml", delta_body.into_bytes());
    bodies.insert("https://example.test/s.xml", snapshot_body.into_bytes());

    let mut uris_fetched = Vec::new();
    let mut files_seen = 0;
    let mut persisted_serial = None;
    let mut ended_ok = None;

    loop {
        match to_parent_rx.recv().await {
            Some(ToParent::HttpReq { id, uri, .. }) => {
                uris_fetched.push(uri.clone());
                let (mut writer, reader) = tokio::io::duplex(4096);
                to_worker_tx.send(ToWorker::HttpIni { id, stream: Box::pin(reader) }).await.unwrap();
                let chunk = bodies.remove(uri.as_str()).expect("unexpected uri requested");
                writer.write_all(&chunk).await.unwrap();
                writer.shutdown().await.unwrap();
                drop(writer);
                to_worker_tx.send(ToWorker::HttpFin { id, status: 200, last_modified: None }).await.unwrap();
            }
            Some(ToParent::File { id, .. }) => {
                files_seen += 1;
                to_worker_tx.send(ToWorker::FileAck { id, ok: true }).await.unwrap();
            }
            Some(ToParent::Session { state, .. }) => {
                persisted_serial = Some(state.serial);
            }
            Some(ToParent::End { ok, .. }) => {
                ended_ok = Some(ok);
                break;
            }
            None => break,
        }
    }

    drop(to_worker_tx);
    scheduler_task.await.unwrap().unwrap();

    assert_eq!(
        uris_fetched,
        vec![
            "https://example.test/notification.xml",
            "https://example.test/6.xml",
            "https://example.test/s.xml",
        ]
    );
    assert_eq!(files_seen, 1, "only the snapshot's publish should reach the parent");
    assert_eq!(persisted_serial, Some(6));
    assert_eq!(ended_ok, Some(true));
}

#[tokio::test]
async fn s7_file_ack_failure_fails_the_session() {
    let snapshot_body = format!(
        r#"<snapshot xmlns="{NS}" version="1" session_id="A" serial="1"><publish uri="rsync://example.test/1.cer">{}</publish></snapshot>"#,
        b64("hello")
    );
    let snapshot_hash = sha256_hex(snapshot_body.as_bytes());
    let notif = format!(
        r#"<notification xmlns="{NS}" version="1" session_id="A" serial="1"><snapshot uri="https://example.test/s.xml" hash="{snapshot_hash}"/></notification>"#
    );

    let (to_worker_tx, to_worker_rx) = mpsc::channel(32);
    let (to_parent_tx, mut to_parent_rx) = mpsc::channel(32);
    let scheduler = Scheduler::new(Config::default());
    let scheduler_task = tokio::spawn(scheduler.run(to_worker_rx, to_parent_tx));

    to_worker_tx
        .send(ToWorker::Start {
            id: 3,
            notify_uri: "https://example.test/notification.xml".into(),
            local_path: PathBuf::from("/tmp/repo"),
            repository: RepositoryState::empty(),
        })
        .await
        .unwrap();

    let mut bodies: HashMap<&str, Vec<u8>> = HashMap::new();
    bodies.insert("https://example.test/notification.xml", notif.into_bytes());
    bodies.insert("https://example.test/s.xml", snapshot_body.into_bytes());

    let mut ended_ok = None;
    loop {
        match to_parent_rx.recv().await {
            Some(ToParent::HttpReq { id, uri, .. }) => {
                let (mut writer, reader) = tokio::io::duplex(4096);
                to_worker_tx.send(ToWorker::HttpIni { id, stream: Box::pin(reader) }).await.unwrap();
                let chunk = bodies.remove(uri.as_str()).expect("unexpected uri requested");
                writer.write_all(&chunk).await.unwrap();
                writer.shutdown().await.unwrap();
                drop(writer);
                to_worker_tx.send(ToWorker::HttpFin { id, status: 200, last_modified: None }).await.unwrap();
            }
            Some(ToParent::File { id, .. }) => {
                // Parent reports it could not apply the file.
                to_worker_tx.send(ToWorker::FileAck { id, ok: false }).await.unwrap();
            }
            Some(ToParent::Session { .. }) => panic!("no SESSION should be sent on failure"),
            Some(ToParent::End { ok, .. }) => {
                ended_ok = Some(ok);
                break;
            }
            None => break,
        }
    }

    drop(to_worker_tx);
    scheduler_task.await.unwrap().unwrap();
    assert_eq!(ended_ok, Some(false));
}

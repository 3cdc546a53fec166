//! A thin runnable entry point. The real consumer is expected to embed
//! `rrdp_worker::scheduler::Scheduler` directly and own the transport
//! (HTTPS fetching, disk writes) itself — this binary only exists so the
//! crate builds a standalone artifact, the way `rrdpit`'s `main.rs`
//! wraps `rrdpit::rrdp`.

use clap::Parser;

use rrdp_worker::config::Config;
use rrdp_worker::scheduler::Scheduler;

#[tokio::main]
async fn main() {
    #[cfg(feature = "bin-logging")]
    env_logger::init();

    let config = Config::parse();
    let (to_worker_tx, to_worker_rx) = tokio::sync::mpsc::channel(64);
    let (to_parent_tx, mut to_parent_rx) = tokio::sync::mpsc::channel(64);

    // A standalone run with no sessions started simply drains an empty
    // queue and exits once the sender side is dropped; a real host drives
    // `to_worker_tx` with `Start`/`HttpIni`/`HttpFin`/`FileAck` messages.
    drop(to_worker_tx);

    let scheduler = Scheduler::new(config);
    let drain = tokio::spawn(async move { while to_parent_rx.recv().await.is_some() {} });

    if let Err(e) = scheduler.run(to_worker_rx, to_parent_tx).await {
        eprintln!("{e}");
        let _ = drain.await;
        std::process::exit(1);
    }
    let _ = drain.await;
}

//! nback daemon - n-back training session service
//!
//! Runs in the background and serves a JSON-lines protocol over TCP:
//! - Realtime game channel: paced stimulus delivery, running scores,
//!   block completion and adaptive difficulty suggestions
//! - Session management: create/inspect/end sessions by id
//! - Sync boundary: durable storage of finished sessions
//!
//! Storage locations:
//! - Linux: ~/.local/share/nback/
//! - Windows: %APPDATA%\nback\
//! - MacOS: ~/Library/Application Support/nback/

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::info;

mod client;
mod paths;
mod protocol;
mod registry;
mod store;

use paths::AppPaths;
use registry::{now_ms, Registry, RETENTION_MS, SWEEP_INTERVAL_SECS};
use store::SessionStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let paths = AppPaths::new()?;
    info!("Data directory: {:?}", paths.data_dir());

    let store = Arc::new(Mutex::new(SessionStore::open(paths)?));
    let registry = Arc::new(Registry::new());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C: shutting down");
            std::process::exit(0);
        }
    });

    // Periodic cleanup of stale terminal sessions.
    {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                registry.sweep(now_ms(), RETENTION_MS).await;
            }
        });
    }

    let addr =
        std::env::var("NBACKD_ADDR").unwrap_or_else(|_| "127.0.0.1:9876".to_string());
    let listener = TcpListener::bind(&addr).await?;
    info!("nback daemon listening on {}", addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        info!("Client connected: {}", peer);
        let registry = Arc::clone(&registry);
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            client::handle_client(stream, registry, store).await;
        });
    }
}

//! Per-connection handler.
//!
//! One task reads JSON lines and dispatches requests; a second task drains the
//! connection's event queue onto the socket. Delivery tasks and completion
//! paths push into the same queue, so everything the client sees goes through
//! one writer and arrives in order.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info};

use nback::error::EngineError;

use crate::protocol::{Event, Request};
use crate::registry::{ConnectionId, EventSender, Registry};
use crate::store::SessionStore;

pub async fn handle_client(
    stream: TcpStream,
    registry: Arc<Registry>,
    store: Arc<Mutex<SessionStore>>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    let writer_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let line = match serde_json::to_string(&event) {
                Ok(line) => line,
                Err(e) => {
                    error!("Failed to encode event: {}", e);
                    continue;
                }
            };
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if writer.write_all(b"\n").await.is_err() {
                break;
            }
        }
    });

    let conn_id = registry.on_connect(tx.clone()).await;
    info!(conn_id, "Client connected");

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Request>(line) {
                    Ok(request) => {
                        dispatch(&registry, &store, conn_id, &tx, request).await;
                    }
                    Err(e) => {
                        debug!(conn_id, "Unparseable request: {}", e);
                        let _ = tx.send(Event::Error {
                            code: "bad_request".to_string(),
                            message: format!("Invalid request: {}", e),
                        });
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(conn_id, "Read error: {}", e);
                break;
            }
        }
    }

    registry.on_disconnect(conn_id).await;
    info!(conn_id, "Client disconnected");

    drop(tx);
    let _ = writer_task.await;
}

fn send_engine_error(tx: &EventSender, err: &EngineError) {
    let _ = tx.send(Event::Error {
        code: err.code().to_string(),
        message: err.to_string(),
    });
}

async fn dispatch(
    registry: &Registry,
    store: &Mutex<SessionStore>,
    conn_id: ConnectionId,
    tx: &EventSender,
    request: Request,
) {
    match request {
        // Realtime game channel: success flows back as events pushed by the
        // registry; only failures produce a direct reply here.
        Request::StartGame {
            mode,
            n_level,
            block_size,
            isi_seconds,
        } => {
            if let Err(e) = registry
                .on_start(conn_id, mode, n_level, block_size, isi_seconds)
                .await
            {
                send_engine_error(tx, &e);
            }
        }
        Request::UserResponse { response } => {
            if let Err(e) = registry.on_response(conn_id, response).await {
                send_engine_error(tx, &e);
            }
        }
        Request::RecordClaim { response } => {
            if let Err(e) = registry.on_claim(conn_id, response).await {
                send_engine_error(tx, &e);
            }
        }
        Request::PauseGame => {
            if let Err(e) = registry.on_pause(conn_id).await {
                send_engine_error(tx, &e);
            }
        }
        Request::ResumeGame => {
            if let Err(e) = registry.on_resume(conn_id).await {
                send_engine_error(tx, &e);
            }
        }
        Request::EndGame => {
            if let Err(e) = registry.on_end(conn_id).await {
                send_engine_error(tx, &e);
            }
        }

        // Non-realtime management surface.
        Request::CreateSession {
            mode,
            n_level,
            block_size,
            isi_seconds,
        } => match registry
            .create_session(mode, n_level, block_size, isi_seconds)
            .await
        {
            Ok((session_id, config, total_trials)) => {
                let _ = tx.send(Event::SessionCreated {
                    session_id,
                    config,
                    total_trials,
                });
            }
            Err(e) => send_engine_error(tx, &e),
        },
        Request::GetSession { session_id } => match registry.session_summary(&session_id).await {
            Ok(summary) => {
                let _ = tx.send(Event::SessionInfo { summary });
            }
            Err(e) => send_engine_error(tx, &e),
        },
        Request::EndSession { session_id } => match registry.end_session(&session_id).await {
            Ok(()) => {
                let _ = tx.send(Event::Success {
                    message: format!("Session {} ended", session_id),
                });
            }
            Err(e) => send_engine_error(tx, &e),
        },

        // Sync boundary: the registry holds the authoritative trial log, the
        // store enforces terminal-only and once-only.
        Request::SyncSession { session_id } => {
            let record = match registry.session_record(&session_id).await {
                Ok(record) => record,
                Err(e) => {
                    send_engine_error(tx, &e);
                    return;
                }
            };
            let result = store.lock().await.submit(record);
            match result {
                Ok(()) => {
                    let _ = tx.send(Event::SessionSynced { session_id });
                }
                Err(e) => {
                    let _ = tx.send(Event::Error {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        Request::ListSessions { page, limit } => {
            let (records, total) = store.lock().await.list(page, limit);
            let _ = tx.send(Event::SessionList {
                records,
                page,
                limit,
                total,
            });
        }

        Request::Health => {
            let (connected_clients, active_sessions, tracked_sessions) = registry.counts().await;
            let stored_sessions = store.lock().await.len() as u32;
            let _ = tx.send(Event::Health {
                connected_clients,
                active_sessions,
                tracked_sessions,
                stored_sessions,
            });
        }
    }
}

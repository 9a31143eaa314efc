//! WebSocket transport
//!
//! Bidirectional JSON frames, one JSON-RPC message per text frame. Three
//! cooperating tasks per connection (forward, receive, send) shut down
//! together through a broadcast signal; protocol pings run on the heartbeat
//! interval and two missed pongs disconnect the client.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::middleware::ApiErrorResponse;
use crate::state::AppState;
use sb_broker::{ClientInfo, Session, SinkKind, SinkMessage};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub session: Option<String>,
}

#[utoipa::path(
    get,
    path = "/ws",
    tag = "transport",
    params(("session" = Option<String>, Query, description = "Existing session token")),
    responses(
        (status = 101, description = "WebSocket upgrade"),
        (status = 404, description = "Unknown session", body = crate::middleware::error::ErrorResponse)
    )
)]
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let store = state.broker.store();
    let (session, created) = match &query.session {
        Some(id) => match store.get(id) {
            Some(session) => (session, false),
            None => return ApiErrorResponse::not_found("Unknown session").into_response(),
        },
        None => (store.create(ClientInfo::default()), true),
    };

    ws.on_upgrade(move |socket| handle_websocket(socket, state, session, created))
}

async fn handle_websocket(
    socket: WebSocket,
    state: AppState,
    session: Arc<Session>,
    announce_session: bool,
) {
    let session_id = session.session_id.clone();
    info!("WebSocket attached to session {}", session_id);

    let sink = session.attach_sink(SinkKind::WebSocket);
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Message>();
    let (shutdown_tx, mut shutdown_rx1) = tokio::sync::broadcast::channel::<()>(1);
    let mut shutdown_rx2 = shutdown_tx.subscribe();
    let mut shutdown_rx3 = shutdown_tx.subscribe();

    let missed_pongs = Arc::new(AtomicU32::new(0));

    if announce_session {
        // Tell an auto-created client which session it got
        let _ = tx.send(Message::Text(
            json!({"type": "bridge/session", "session": session_id}).to_string(),
        ));
    }

    // Task 1: drain the session sink into the send channel
    let tx_forward = tx.clone();
    let shutdown_for_forward = shutdown_tx.clone();
    let sink_for_forward = sink.clone();
    let forward_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx1.recv() => break,
                _ = sink_for_forward.queue.wait() => {
                    while let Some(message) = sink_for_forward.queue.pop() {
                        match message {
                            SinkMessage::Payload(value) => {
                                let text = match serde_json::to_string(&value) {
                                    Ok(t) => t,
                                    Err(e) => {
                                        tracing::error!("failed to serialize WS payload: {}", e);
                                        continue;
                                    }
                                };
                                if tx_forward.send(Message::Text(text)).is_err() {
                                    return;
                                }
                            }
                            SinkMessage::End { reason } => {
                                let _ = tx_forward.send(Message::Close(Some(CloseFrame {
                                    code: close_code::AWAY,
                                    reason: reason.into(),
                                })));
                                let _ = shutdown_for_forward.send(());
                                return;
                            }
                        }
                    }
                }
            }
        }
    });

    // Task 2: receive frames, route messages, account for pongs
    let broker = state.broker.clone();
    let shutdown_for_receive = shutdown_tx.clone();
    let tx_receive = tx.clone();
    let missed_for_receive = missed_pongs.clone();
    let session_for_receive = session_id.clone();
    let receive_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx2.recv() => break,
                frame = receiver.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            let payload: serde_json::Value = match serde_json::from_str(&text) {
                                Ok(v) => v,
                                Err(_) => {
                                    let _ = tx_receive.send(Message::Text(
                                        json!({"error": "invalid json"}).to_string(),
                                    ));
                                    continue;
                                }
                            };
                            if let Err(e) = broker
                                .route_from_client(&session_for_receive, payload)
                                .await
                            {
                                warn!("WS routing error for {}: {}", session_for_receive, e);
                                let _ = shutdown_for_receive.send(());
                                break;
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            missed_for_receive.store(0, Ordering::SeqCst);
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("WebSocket closed by client {}", session_for_receive);
                            let _ = shutdown_for_receive.send(());
                            break;
                        }
                        Some(Err(e)) => {
                            debug!("WebSocket receive error: {}", e);
                            let _ = shutdown_for_receive.send(());
                            break;
                        }
                        _ => {}
                    }
                }
            }
        }
    });

    // Task 3: pump the send channel and the heartbeat pings
    let heartbeat = state.config.heartbeat_interval;
    let shutdown_for_send = shutdown_tx.clone();
    let send_task = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat);
        ping_interval.tick().await; // first tick fires immediately
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx3.recv() => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                _ = ping_interval.tick() => {
                    let missed = missed_pongs.fetch_add(1, Ordering::SeqCst) + 1;
                    if missed > 2 {
                        warn!("WebSocket missed {} pongs, disconnecting", missed - 1);
                        let _ = sender.send(Message::Close(None)).await;
                        let _ = shutdown_for_send.send(());
                        break;
                    }
                    if sender.send(Message::Ping(Vec::new())).await.is_err() {
                        let _ = shutdown_for_send.send(());
                        break;
                    }
                }
                message = rx.recv() => {
                    match message {
                        Some(frame) => {
                            if sender.send(frame).await.is_err() {
                                let _ = shutdown_for_send.send(());
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    });

    let _ = tokio::join!(forward_task, receive_task, send_task);
    session.detach_sink(sink.id);
    info!("WebSocket connection closed for session {}", session_id);
}

//! SSE transport
//!
//! `GET /sse` attaches a stream to an existing session or auto-creates one.
//! The first event is `event: endpoint` carrying the absolute POST URL for
//! this session; every queued payload follows as `event: message`, comment
//! heartbeats keep proxies from timing the stream out, and a final
//! `event: end` announces session close.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{debug, info};

use crate::middleware::ApiErrorResponse;
use crate::state::AppState;
use sb_broker::{ClientInfo, Session, SinkKind, SinkMessage};

#[derive(Debug, Deserialize)]
pub struct SseQuery {
    pub session: Option<String>,
}

/// Detaches the sink when the stream is dropped, however it ends
struct DetachOnDrop {
    session: Arc<Session>,
    sink_id: u64,
}

impl Drop for DetachOnDrop {
    fn drop(&mut self) {
        self.session.detach_sink(self.sink_id);
        debug!(
            "SSE stream for session {} ended, sink {} detached",
            self.session.session_id, self.sink_id
        );
    }
}

#[utoipa::path(
    get,
    path = "/sse",
    tag = "transport",
    params(("session" = Option<String>, Query, description = "Existing session token")),
    responses(
        (status = 200, description = "SSE event stream", content_type = "text/event-stream"),
        (status = 404, description = "Unknown session", body = crate::middleware::error::ErrorResponse)
    )
)]
pub async fn sse_handler(
    State(state): State<AppState>,
    Query(query): Query<SseQuery>,
    headers: HeaderMap,
) -> Response {
    let store = state.broker.store();
    let session = match &query.session {
        Some(id) => match store.get(id) {
            Some(session) => session,
            None => return ApiErrorResponse::not_found("Unknown session").into_response(),
        },
        None => {
            let client_info = ClientInfo {
                user_agent: headers
                    .get("user-agent")
                    .and_then(|h| h.to_str().ok())
                    .map(str::to_string),
                remote_addr: headers
                    .get("x-forwarded-for")
                    .and_then(|h| h.to_str().ok())
                    .map(str::to_string),
            };
            store.create(client_info)
        }
    };

    let post_url = format!(
        "{}/messages?session={}",
        state.base_url(&headers),
        session.session_id
    );
    info!(
        "SSE stream opening for session {} (endpoint {})",
        session.session_id, post_url
    );

    let sink = session.attach_sink(SinkKind::Sse);
    let guard = DetachOnDrop {
        session: session.clone(),
        sink_id: sink.id,
    };

    let stream = async_stream::stream! {
        // Endpoint event first, per the MCP SSE transport convention
        yield Ok::<_, Infallible>(Event::default().event("endpoint").data(post_url));

        loop {
            while let Some(message) = sink.queue.pop() {
                match message {
                    SinkMessage::Payload(value) => {
                        match serde_json::to_string(&value) {
                            Ok(json) => {
                                yield Ok(Event::default().event("message").data(json));
                            }
                            Err(e) => {
                                tracing::error!("failed to serialize SSE payload: {}", e);
                            }
                        }
                    }
                    SinkMessage::End { reason } => {
                        yield Ok(Event::default().event("end").data(reason));
                        drop(guard);
                        return;
                    }
                }
            }
            sink.queue.wait().await;
        }
    };

    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(state.config.heartbeat_interval)
                .text("heartbeat"),
        )
        .into_response()
}

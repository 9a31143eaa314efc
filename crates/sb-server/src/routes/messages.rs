//! HTTP POST ingress
//!
//! One JSON-RPC message per request body. Accepted messages return 202
//! immediately; results arrive on the session's SSE/WS sinks. Parse and
//! envelope errors are synthesized as JSON-RPC errors to the session (the
//! HTTP exchange itself still accepts the body).

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::middleware::ApiErrorResponse;
use crate::state::AppState;
use sb_protocol::JsonRpcError;
use sb_types::AppError;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    pub session: Option<String>,
}

/// Body of the 202 response
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct PostAccepted {
    pub status: &'static str,
}

#[utoipa::path(
    post,
    path = "/messages",
    tag = "transport",
    params(("session" = String, Query, description = "Session token")),
    request_body = sb_protocol::JsonRpcRequest,
    responses(
        (status = 202, description = "Message enqueued", body = PostAccepted),
        (status = 400, description = "Missing session parameter", body = crate::middleware::error::ErrorResponse),
        (status = 404, description = "Unknown session", body = crate::middleware::error::ErrorResponse),
        (status = 413, description = "Body exceeds max_message_bytes", body = crate::middleware::error::ErrorResponse),
        (status = 429, description = "Too many in-flight requests", body = crate::middleware::error::ErrorResponse)
    )
)]
pub async fn post_message(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Response {
    let _guard = match state.metrics.try_acquire_in_flight(state.config.max_in_flight) {
        Some(guard) => guard,
        None => {
            return ApiErrorResponse::too_many_requests("Too many in-flight requests")
                .into_response();
        }
    };

    if body.len() > state.config.max_message_bytes {
        return ApiErrorResponse::payload_too_large(format!(
            "Body of {} bytes exceeds the {} byte limit",
            body.len(),
            state.config.max_message_bytes
        ))
        .into_response();
    }

    let Some(session_id) = query.session else {
        return ApiErrorResponse::bad_request("session query parameter is required")
            .into_response();
    };
    let Some(session) = state.broker.store().get(&session_id) else {
        return ApiErrorResponse::not_found("Unknown session").into_response();
    };

    let message: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            // Malformed JSON answers the session as a JSON-RPC parse error;
            // the transport exchange itself succeeded
            debug!("parse error from session {}: {}", session_id, e);
            session.enqueue_response(json!({
                "jsonrpc": "2.0",
                "id": Value::Null,
                "error": JsonRpcError::parse_error(e.to_string()),
            }));
            return accepted();
        }
    };

    match state.broker.route_from_client(&session_id, message).await {
        Ok(()) => accepted(),
        Err(AppError::SessionNotFound(_)) => {
            ApiErrorResponse::not_found("Unknown session").into_response()
        }
        Err(AppError::Upstream(e)) => ApiErrorResponse::service_unavailable(e).into_response(),
        Err(e) => ApiErrorResponse::internal_error(e.to_string()).into_response(),
    }
}

fn accepted() -> Response {
    (StatusCode::ACCEPTED, Json(PostAccepted { status: "accepted" })).into_response()
}

//! Explicit session management

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::middleware::ApiErrorResponse;
use crate::state::AppState;
use sb_broker::ClientInfo;

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SessionCreated {
    pub session_id: String,
}

#[utoipa::path(
    post,
    path = "/sessions",
    tag = "sessions",
    responses((status = 200, description = "Session created", body = SessionCreated))
)]
pub async fn create_session(State(state): State<AppState>) -> Response {
    let session = state.broker.store().create(ClientInfo::default());
    Json(SessionCreated {
        session_id: session.session_id.clone(),
    })
    .into_response()
}

#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    tag = "sessions",
    params(("id" = String, Path, description = "Session token")),
    responses(
        (status = 204, description = "Session terminated"),
        (status = 404, description = "Unknown session", body = crate::middleware::error::ErrorResponse)
    )
)]
pub async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if state.broker.store().close(&id, "client request") {
        state.broker.registry().drop_session(&id);
        StatusCode::NO_CONTENT.into_response()
    } else {
        ApiErrorResponse::not_found("Unknown session").into_response()
    }
}

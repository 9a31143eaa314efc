//! Counter/gauge snapshot

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/metrics",
    tag = "bridge",
    responses((status = 200, description = "Counter snapshot"))
)]
pub async fn metrics(State(state): State<AppState>) -> Response {
    Json(state.metrics.snapshot()).into_response()
}

//! Liveness endpoint

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::state::AppState;
use sb_upstream::ChildState;

#[utoipa::path(
    get,
    path = "/health",
    tag = "bridge",
    responses((status = 200, description = "Bridge and child state"))
)]
pub async fn health(State(state): State<AppState>) -> Response {
    let child_state = state.broker.upstream().state();
    let status = match child_state {
        ChildState::Ready => "ok",
        ChildState::Starting | ChildState::Degraded => "degraded",
        ChildState::Dead | ChildState::Terminal => "dead",
    };

    let filters: Vec<String> = state
        .broker
        .chain()
        .list()
        .into_iter()
        .filter(|f| f.enabled)
        .map(|f| f.name)
        .collect();

    Json(json!({
        "status": status,
        "child_state": child_state,
        "session_count": state.broker.store().count(),
        "pending_requests": state.broker.registry().len(),
        "filter_count": state.broker.chain().len(),
        "uptime_s": state.metrics.uptime_s(),
        "content_filtering": {
            "enabled": state.content.is_some(),
            "filters": filters,
        }
    }))
    .into_response()
}

//! Filter chain control surface

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::middleware::ApiErrorResponse;
use crate::state::AppState;
use sb_filters::ContentFilterConfig;

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ToggleFilter {
    pub enabled: bool,
}

#[utoipa::path(
    get,
    path = "/filters",
    tag = "filters",
    responses((status = 200, description = "Registered filters", body = [sb_filters::FilterInfo]))
)]
pub async fn list_filters(State(state): State<AppState>) -> Response {
    Json(state.broker.chain().list()).into_response()
}

#[utoipa::path(
    post,
    path = "/filters/{name}",
    tag = "filters",
    params(("name" = String, Path, description = "Filter name")),
    request_body = ToggleFilter,
    responses(
        (status = 200, description = "Filter toggled"),
        (status = 404, description = "Unknown filter", body = crate::middleware::error::ErrorResponse)
    )
)]
pub async fn toggle_filter(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<ToggleFilter>,
) -> Response {
    match state.broker.chain().set_enabled(&name, body.enabled) {
        Ok(()) => Json(json!({
            "status": "ok",
            "name": name,
            "enabled": body.enabled,
        }))
        .into_response(),
        Err(_) => ApiErrorResponse::not_found(format!("Unknown filter {}", name)).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/filters/config",
    tag = "filters",
    request_body = ContentFilterConfig,
    responses(
        (status = 200, description = "Config replaced atomically"),
        (status = 400, description = "Invalid config; previous config kept", body = crate::middleware::error::ErrorResponse)
    )
)]
pub async fn replace_config(State(state): State<AppState>, body: axum::body::Bytes) -> Response {
    let Some(content) = &state.content else {
        return ApiErrorResponse::bad_request("Content filtering is not enabled").into_response();
    };
    // Parsed by hand so every rejection is a 400 with the old config kept
    let config: ContentFilterConfig = match serde_json::from_slice(&body) {
        Ok(c) => c,
        Err(e) => {
            return ApiErrorResponse::bad_request(format!("invalid filter config: {}", e))
                .into_response();
        }
    };
    match content.replace(config) {
        Ok(()) => Json(json!({"status": "ok"})).into_response(),
        Err(e) => ApiErrorResponse::bad_request(e.to_string()).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/filters/metrics",
    tag = "filters",
    responses((status = 200, description = "Per-filter counters"))
)]
pub async fn filter_metrics(State(state): State<AppState>) -> Response {
    Json(state.broker.chain().metrics()).into_response()
}

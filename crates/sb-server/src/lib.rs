//! HTTP transport layer
//!
//! Exposes the broker over SSE, WebSocket, and HTTP POST, plus the control
//! surface (sessions, filters, health, metrics) and the no-auth OAuth
//! metadata endpoints strict MCP clients insist on.

pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;

pub use state::AppState;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;

/// Assemble the full router with auth middleware and body limits
pub fn build_router(state: AppState) -> Router {
    let max_body = state.config.max_message_bytes + 1024;

    Router::new()
        .route("/", get(routes::root))
        .route("/sse", get(routes::sse::sse_handler))
        .route("/messages", post(routes::messages::post_message))
        .route("/ws", get(routes::ws::ws_handler))
        .route("/sessions", post(routes::sessions::create_session))
        .route("/sessions/:id", delete(routes::sessions::delete_session))
        .route("/health", get(routes::health::health))
        .route("/metrics", get(routes::metrics::metrics))
        .route("/filters", get(routes::filters::list_filters))
        .route("/filters/config", post(routes::filters::replace_config))
        .route("/filters/metrics", get(routes::filters::filter_metrics))
        .route("/filters/:name", post(routes::filters::toggle_filter))
        .route(
            "/.well-known/oauth-authorization-server",
            get(routes::oauth::authorization_server_metadata),
        )
        .route(
            "/.well-known/oauth-protected-resource",
            get(routes::oauth::protected_resource_metadata),
        )
        .route("/register", post(routes::oauth::register_client))
        .route(
            "/no-registration-required",
            get(routes::oauth::register_client).post(routes::oauth::register_client),
        )
        .route(
            "/no-auth-required",
            get(routes::oauth::no_auth_required).post(routes::oauth::no_auth_required),
        )
        .route("/live", get(routes::live::live_console))
        .route("/openapi.json", get(openapi::serve_openapi))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ))
        .layer(DefaultBodyLimit::max(max_body))
        .with_state(state)
}

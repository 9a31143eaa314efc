pub mod filters;
pub mod health;
pub mod live;
pub mod messages;
pub mod metrics;
pub mod oauth;
pub mod sessions;
pub mod sse;
pub mod ws;

use axum::response::IntoResponse;

/// Plain-text index naming the interesting endpoints
#[utoipa::path(
    get,
    path = "/",
    tag = "bridge",
    responses((status = 200, description = "Service banner", content_type = "text/plain"))
)]
pub async fn root() -> impl IntoResponse {
    "stdio-bridge is running.\n\
     \n\
     GET  /sse                  SSE stream (auto-creates a session)\n\
     POST /messages?session=ID  submit a JSON-RPC message\n\
     GET  /ws?session=ID        WebSocket transport\n\
     POST /sessions             explicit session creation\n\
     GET  /health               liveness\n\
     GET  /filters              filter chain control\n\
     GET  /live                 live console\n\
     GET  /openapi.json         OpenAPI document\n"
}

//! OpenAPI document for the HTTP surface

use axum::response::{IntoResponse, Response};
use axum::Json;
use utoipa::OpenApi;

use crate::routes;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "stdio-bridge",
        description = "Expose a stdio JSON-RPC server over SSE, WebSocket, and HTTP POST with a runtime filter chain"
    ),
    paths(
        routes::root,
        routes::sse::sse_handler,
        routes::messages::post_message,
        routes::ws::ws_handler,
        routes::sessions::create_session,
        routes::sessions::delete_session,
        routes::health::health,
        routes::metrics::metrics,
        routes::filters::list_filters,
        routes::filters::toggle_filter,
        routes::filters::replace_config,
        routes::filters::filter_metrics,
        routes::oauth::authorization_server_metadata,
        routes::oauth::protected_resource_metadata,
        routes::oauth::register_client,
        routes::oauth::no_auth_required,
        routes::live::live_console,
    ),
    components(schemas(
        sb_protocol::JsonRpcRequest,
        sb_protocol::JsonRpcResponse,
        sb_protocol::JsonRpcError,
        sb_protocol::JsonRpcNotification,
        sb_filters::FilterInfo,
        sb_filters::DirectionMask,
        sb_filters::FilterDirection,
        sb_filters::ContentFilterConfig,
        crate::middleware::error::ErrorResponse,
        crate::routes::messages::PostAccepted,
        crate::routes::sessions::SessionCreated,
        crate::routes::filters::ToggleFilter,
    ))
)]
pub struct ApiDoc;

pub async fn serve_openapi() -> Response {
    Json(ApiDoc::openapi()).into_response()
}

//! No-auth OAuth metadata surface
//!
//! Strict MCP clients refuse to open SSE until OAuth discovery succeeds, so
//! even with authentication disabled the bridge serves a complete metadata
//! document with every URL field populated, plus a dummy dynamic client
//! registration endpoint.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/.well-known/oauth-authorization-server",
    tag = "oauth",
    responses((status = 200, description = "OAuth 2.1 authorization server metadata"))
)]
pub async fn authorization_server_metadata(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let base_url = state.base_url(&headers);
    Json(json!({
        "issuer": base_url,
        "authorization_endpoint": format!("{}/no-auth-required", base_url),
        "token_endpoint": format!("{}/no-auth-required", base_url),
        "registration_endpoint": format!("{}/no-registration-required", base_url),
        "scopes_supported": ["none"],
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code"],
        "subject_types_supported": ["public"],
        "code_challenge_methods_supported": ["S256"],
        "token_endpoint_auth_methods_supported": ["none"],
    }))
    .into_response()
}

#[utoipa::path(
    get,
    path = "/.well-known/oauth-protected-resource",
    tag = "oauth",
    responses((status = 200, description = "OAuth protected resource metadata"))
)]
pub async fn protected_resource_metadata(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let base_url = state.base_url(&headers);
    Json(json!({
        "resource_server": base_url,
        // Empty list signals that no authorization server is required
        "authorization_servers": [],
        "scopes_supported": [],
        "bearer_methods_supported": [],
        "resource_documentation": format!("{}/", base_url),
        "resource_policy_uri": format!("{}/", base_url),
    }))
    .into_response()
}

/// Dummy dynamic client registration (`POST /register` and the
/// `/no-registration-required` aliases)
#[utoipa::path(
    post,
    path = "/register",
    tag = "oauth",
    responses((status = 200, description = "Dummy client registration"))
)]
pub async fn register_client(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let base_url = state.base_url(&headers);
    Json(json!({
        "client_id": "no-auth-required",
        "client_secret": "no-auth-required",
        "redirect_uris": [format!("{}/no-auth-required", base_url)],
        "client_name": "MCP Client (No Auth Required)",
        "client_uri": base_url,
        "grant_types": ["authorization_code"],
        "response_types": ["code"],
        "scope": "none",
    }))
    .into_response()
}

/// Placeholder authorize/token endpoint
#[utoipa::path(
    get,
    path = "/no-auth-required",
    tag = "oauth",
    responses((status = 200, description = "No authentication is required"))
)]
pub async fn no_auth_required() -> Response {
    Json(json!({
        "error": "no_authentication_required",
        "error_description": "This bridge operates without authentication for local network use",
    }))
    .into_response()
}

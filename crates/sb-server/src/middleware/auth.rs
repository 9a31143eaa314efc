//! Request authentication for the HTTP surface
//!
//! Three modes via `BRIDGE_AUTH_MODE`: none, bearer, apikey. Discovery,
//! health, and the OAuth metadata surface always bypass auth so strict
//! clients can complete their handshake before presenting credentials.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::middleware::error::ApiErrorResponse;
use crate::state::AppState;
use sb_config::AuthMode;

/// Paths reachable without credentials in every auth mode
const OPEN_PATHS: &[&str] = &[
    "/",
    "/health",
    "/.well-known/oauth-authorization-server",
    "/.well-known/oauth-protected-resource",
    "/register",
    "/no-registration-required",
    "/no-auth-required",
    "/openapi.json",
];

/// Extract Bearer token from an Authorization header value
///
/// Rejects empty and whitespace-only tokens; internal whitespace is kept.
fn extract_bearer_token(auth_header: &str) -> Option<String> {
    auth_header.strip_prefix("Bearer ").and_then(|s| {
        if s.trim().is_empty() {
            None
        } else {
            Some(s.to_string())
        }
    })
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if state.config.auth_mode == AuthMode::None {
        return next.run(req).await;
    }

    let path = req.uri().path();
    if OPEN_PATHS.contains(&path) {
        return next.run(req).await;
    }

    match state.config.auth_mode {
        AuthMode::None => unreachable!("handled above"),
        AuthMode::Bearer => {
            let header = match req
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
            {
                Some(h) => h,
                None => {
                    return ApiErrorResponse::unauthorized("Missing Authorization header")
                        .into_response();
                }
            };
            match extract_bearer_token(header) {
                Some(token) if token == state.config.auth_secret => next.run(req).await,
                Some(_) => {
                    tracing::warn!("invalid bearer token presented");
                    ApiErrorResponse::unauthorized("Invalid bearer token").into_response()
                }
                None => ApiErrorResponse::unauthorized(
                    "Invalid Authorization header format. Expected: Bearer <token>",
                )
                .into_response(),
            }
        }
        AuthMode::ApiKey => {
            let key = req.headers().get("x-api-key").and_then(|h| h.to_str().ok());
            if key == Some(state.config.auth_secret.as_str()) {
                next.run(req).await
            } else {
                ApiErrorResponse::unauthorized("Invalid API key").into_response()
            }
        }
    }
}

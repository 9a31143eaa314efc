//! HTTP surface tests driven through the router with `tower::oneshot`

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use sb_broker::{Broker, BrokerOptions, Catalog, RequestRegistry, SessionStore};
use sb_config::{AuthMode, BridgeConfig};
use sb_filters::FilterChain;
use sb_monitoring::BridgeMetrics;
use sb_server::{build_router, AppState};
use sb_upstream::{ChildState, UpstreamHandle};

fn app_with(config: BridgeConfig) -> axum::Router {
    let metrics = Arc::new(BridgeMetrics::new());
    let store = Arc::new(SessionStore::new(
        metrics.clone(),
        config.max_queue_depth,
        config.hard_cap,
        Duration::from_secs(300),
        Duration::from_secs(15),
    ));
    let (upstream, mut child_stdin) = UpstreamHandle::loopback(ChildState::Ready);
    // Keep the loopback child's stdin open for the lifetime of the test app
    tokio::spawn(async move { while child_stdin.recv().await.is_some() {} });
    let broker = Arc::new(Broker::new(
        store,
        Arc::new(RequestRegistry::new()),
        Arc::new(FilterChain::new()),
        Arc::new(Catalog::new()),
        metrics.clone(),
        upstream,
        BrokerOptions::default(),
    ));
    build_router(AppState::new(broker, metrics, Arc::new(config), None))
}

fn app() -> axum::Router {
    app_with(BridgeConfig::default())
}

/// App with the content filters registered, as `--filter_config` would
fn app_with_content_filters() -> axum::Router {
    use sb_filters::{
        BlacklistFilter, ContentFilterConfig, ContentState, HtmlSanitizer, PiiRedactor,
        SizeManager,
    };

    let config = BridgeConfig::default();
    let metrics = Arc::new(BridgeMetrics::new());
    let store = Arc::new(SessionStore::new(
        metrics.clone(),
        config.max_queue_depth,
        config.hard_cap,
        Duration::from_secs(300),
        Duration::from_secs(15),
    ));
    let (upstream, mut child_stdin) = UpstreamHandle::loopback(ChildState::Ready);
    tokio::spawn(async move { while child_stdin.recv().await.is_some() {} });

    let content = ContentState::new(ContentFilterConfig::default()).unwrap();
    let mut chain = FilterChain::new();
    chain.register(Arc::new(BlacklistFilter::new(content.clone())), true);
    chain.register(Arc::new(HtmlSanitizer::new(content.clone())), true);
    chain.register(Arc::new(PiiRedactor::new(content.clone())), true);
    chain.register(Arc::new(SizeManager::new(content.clone())), true);

    let broker = Arc::new(Broker::new(
        store,
        Arc::new(RequestRegistry::new()),
        Arc::new(chain),
        Arc::new(Catalog::new()),
        metrics.clone(),
        upstream,
        BrokerOptions::default(),
    ));
    build_router(AppState::new(
        broker,
        metrics,
        Arc::new(config),
        Some(content),
    ))
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn oauth_metadata_satisfies_strict_clients() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/.well-known/oauth-authorization-server")
                .header("host", "bridge.test:8100")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    // Every URL field must be a valid non-null string
    for field in [
        "issuer",
        "authorization_endpoint",
        "token_endpoint",
        "registration_endpoint",
    ] {
        let value = body.get(field).unwrap_or(&Value::Null);
        assert!(
            value.as_str().map(|s| !s.is_empty()).unwrap_or(false),
            "{} must be a non-empty string, got {:?}",
            field,
            value
        );
    }
    assert_eq!(body["response_types_supported"], serde_json::json!(["code"]));
    assert_eq!(
        body["grant_types_supported"],
        serde_json::json!(["authorization_code"])
    );
    // Host header drives the advertised URLs
    assert!(body["issuer"].as_str().unwrap().contains("bridge.test:8100"));
}

#[tokio::test]
async fn registration_returns_client_id_and_redirect_uris() {
    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/register")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert!(body["client_id"].is_string());
    assert!(body["redirect_uris"].is_array());
    assert!(!body["redirect_uris"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn no_auth_required_reports_the_expected_error() {
    for method in ["GET", "POST"] {
        let response = app()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri("/no-auth-required")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["error"], "no_authentication_required");
    }
}

#[tokio::test]
async fn sessions_create_twice_yields_two_distinct_sessions() {
    let app = app();

    let mut ids = Vec::new();
    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sessions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        ids.push(body["session_id"].as_str().unwrap().to_string());
    }
    assert_ne!(ids[0], ids[1]);
}

#[tokio::test]
async fn delete_session_is_not_idempotent_at_http_level() {
    let app = app();
    let created = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/sessions")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let id = json_body(created).await["session_id"]
        .as_str()
        .unwrap()
        .to_string();

    let first = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/sessions/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::NO_CONTENT);

    let second = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/sessions/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn post_message_unknown_session_is_404() {
    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/messages?session=missing")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"x"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn post_message_accepts_and_enqueues() {
    let app = app();
    let created = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/sessions")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let id = json_body(created).await["session_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/messages?session={}", id))
                .header("content-type", "application/json")
                .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"foo"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(json_body(response).await["status"], "accepted");
}

#[tokio::test]
async fn oversized_body_is_rejected_with_413() {
    let config = BridgeConfig {
        max_message_bytes: 256,
        ..Default::default()
    };
    let app = app_with(config);
    let created = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/sessions")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let id = json_body(created).await["session_id"]
        .as_str()
        .unwrap()
        .to_string();

    let big = format!(
        r#"{{"jsonrpc":"2.0","id":1,"method":"x","params":{{"blob":"{}"}}}}"#,
        "a".repeat(512)
    );
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/messages?session={}", id))
                .header("content-type", "application/json")
                .body(Body::from(big))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn sse_stream_starts_with_endpoint_event() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/sse")
                .header("host", "bridge.test:8100")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let mut body = response.into_body();
    let frame = body.frame().await.unwrap().unwrap();
    let chunk = frame.into_data().unwrap();
    let text = String::from_utf8_lossy(&chunk);
    assert!(text.contains("event: endpoint"), "first event: {}", text);
    assert!(
        text.contains("http://bridge.test:8100/messages?session="),
        "endpoint carries the absolute post URL: {}",
        text
    );
}

#[tokio::test]
async fn health_reports_shape() {
    let response = app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["child_state"], "ready");
    assert!(body["session_count"].is_u64());
    assert!(body["pending_requests"].is_u64());
    assert!(body["content_filtering"]["enabled"].is_boolean());
}

#[tokio::test]
async fn bearer_auth_guards_transport_but_not_health() {
    let config = BridgeConfig {
        auth_mode: AuthMode::Bearer,
        auth_secret: "sekrit".to_string(),
        ..Default::default()
    };
    let app = app_with(config);

    // Health is always open
    let health = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    // OAuth discovery is always open
    let oauth = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/.well-known/oauth-authorization-server")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(oauth.status(), StatusCode::OK);

    // Transport requires the token
    let denied = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/sessions")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

    let allowed = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/sessions")
                .header("Authorization", "Bearer sekrit")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);
}

#[tokio::test]
async fn filter_config_replace_validates_and_keeps_old_on_400() {
    let app = app_with_content_filters();

    // A bad regex is rejected with 400
    let bad = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/filters/config")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"blocked_patterns":["["]}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

    // A clean config replaces atomically
    let good = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/filters/config")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"blocked_domains":["evil.example"]}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(good.status(), StatusCode::OK);
}

#[tokio::test]
async fn content_filter_metrics_exposed_per_filter() {
    let app = app_with_content_filters();

    let listing = app
        .clone()
        .oneshot(Request::builder().uri("/filters").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let filters = json_body(listing).await;
    let names: Vec<&str> = filters
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    for expected in ["blacklist", "html_sanitizer", "pii_redactor", "size_manager"] {
        assert!(names.contains(&expected), "missing filter {}", expected);
    }

    let metrics = app
        .oneshot(
            Request::builder()
                .uri("/filters/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = json_body(metrics).await;
    assert_eq!(body["pii_redactor"]["redactions"]["email"], 0);
    assert!(body["blacklist"].get("blocked").is_some());
}

#[tokio::test]
async fn filters_listing_and_unknown_toggle() {
    let app = app();

    let listing = app
        .clone()
        .oneshot(Request::builder().uri("/filters").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(listing.status(), StatusCode::OK);
    assert!(json_body(listing).await.is_array());

    let toggle = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/filters/nope")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"enabled":true}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(toggle.status(), StatusCode::NOT_FOUND);
}

//! End-to-end broker scenarios over a loopback upstream
//!
//! The loopback receiver plays the child's stdin; upstream frames are
//! injected through `handle_upstream_event`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use sb_broker::{Broker, BrokerOptions, Catalog, ClientInfo, SessionStore, SinkKind, SinkMessage};
use sb_filters::{BlacklistFilter, ContentFilterConfig, ContentState, FilterChain};
use sb_monitoring::BridgeMetrics;
use sb_upstream::{ChildState, UpstreamEvent, UpstreamHandle};

struct Harness {
    broker: Arc<Broker>,
    child_stdin: mpsc::Receiver<Value>,
    upstream: UpstreamHandle,
    store: Arc<SessionStore>,
    metrics: Arc<BridgeMetrics>,
}

fn harness_with(chain: FilterChain, catalog: Catalog, depth: usize, cap: usize) -> Harness {
    let metrics = Arc::new(BridgeMetrics::new());
    let store = Arc::new(SessionStore::new(
        metrics.clone(),
        depth,
        cap,
        Duration::from_secs(300),
        Duration::from_secs(15),
    ));
    let (upstream, child_stdin) = UpstreamHandle::loopback(ChildState::Ready);
    let broker = Arc::new(Broker::new(
        store.clone(),
        Arc::new(sb_broker::RequestRegistry::new()),
        Arc::new(chain),
        Arc::new(catalog),
        metrics.clone(),
        upstream.clone(),
        BrokerOptions::default(),
    ));
    Harness {
        broker,
        child_stdin,
        upstream,
        store,
        metrics,
    }
}

fn harness() -> Harness {
    harness_with(FilterChain::new(), Catalog::new(), 64, 128)
}

fn pop_payload(sink: &sb_broker::Sink) -> Option<Value> {
    match sink.queue.pop() {
        Some(SinkMessage::Payload(v)) => Some(v),
        _ => None,
    }
}

#[tokio::test]
async fn discovery_short_circuit_writes_nothing_upstream() {
    let catalog = Catalog::from_file(
        serde_json::from_str(
            r#"{"tools":[{"name":"echo","description":"e","inputSchema":{"type":"object"}}]}"#,
        )
        .unwrap(),
    );
    let mut h = harness_with(FilterChain::new(), catalog, 64, 128);

    let session = h.store.create(ClientInfo::default());
    let sink = session.attach_sink(SinkKind::Sse);

    h.broker
        .route_from_client(
            &session.session_id,
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
        )
        .await
        .unwrap();

    let response = pop_payload(&sink).expect("catalog answer");
    assert_eq!(response["id"], 1);
    assert_eq!(response["result"]["tools"][0]["name"], "echo");

    assert!(h.child_stdin.try_recv().is_err(), "child stdin must stay untouched");
    assert_eq!(
        h.metrics.snapshot()["messages"]["to_child"],
        0,
        "zero bytes to the child"
    );
}

#[tokio::test]
async fn id_rewriting_isolates_concurrent_sessions() {
    let mut h = harness();

    let sa = h.store.create(ClientInfo::default());
    let sb = h.store.create(ClientInfo::default());
    let sink_a = sa.attach_sink(SinkKind::Sse);
    let sink_b = sb.attach_sink(SinkKind::Sse);

    // Both clients reuse the same id "abc"
    let request = json!({"jsonrpc": "2.0", "id": "abc", "method": "foo"});
    h.broker
        .route_from_client(&sa.session_id, request.clone())
        .await
        .unwrap();
    h.broker
        .route_from_client(&sb.session_id, request)
        .await
        .unwrap();

    // The child sees two distinct numeric bridge ids
    let first = h.child_stdin.recv().await.unwrap();
    let second = h.child_stdin.recv().await.unwrap();
    let id_a = first["id"].as_u64().unwrap();
    let id_b = second["id"].as_u64().unwrap();
    assert_ne!(id_a, id_b);
    assert_eq!(first["method"], "foo");

    // Child answers out of order
    h.broker
        .handle_upstream_event(UpstreamEvent::Message(
            json!({"jsonrpc": "2.0", "id": id_b, "result": "B"}),
        ))
        .await;
    h.broker
        .handle_upstream_event(UpstreamEvent::Message(
            json!({"jsonrpc": "2.0", "id": id_a, "result": "A"}),
        ))
        .await;

    let got_a = pop_payload(&sink_a).expect("response for A");
    assert_eq!(got_a["id"], "abc");
    assert_eq!(got_a["result"], "A");
    assert!(pop_payload(&sink_a).is_none(), "A must not see B's result");

    let got_b = pop_payload(&sink_b).expect("response for B");
    assert_eq!(got_b["id"], "abc");
    assert_eq!(got_b["result"], "B");
    assert!(pop_payload(&sink_b).is_none());
}

#[tokio::test]
async fn blacklist_block_never_reaches_child() {
    let state = ContentState::new(ContentFilterConfig {
        blocked_domains: vec!["evil.example".to_string()],
        ..Default::default()
    })
    .unwrap();
    let mut chain = FilterChain::new();
    chain.register(Arc::new(BlacklistFilter::new(state)), true);

    let mut h = harness_with(chain, Catalog::new(), 64, 128);
    let session = h.store.create(ClientInfo::default());
    let sink = session.attach_sink(SinkKind::Sse);

    h.broker
        .route_from_client(
            &session.session_id,
            json!({
                "jsonrpc": "2.0", "id": 7, "method": "tools/call",
                "params": {"name": "scrape", "arguments": {"url": "https://evil.example/x"}}
            }),
        )
        .await
        .unwrap();

    let response = pop_payload(&sink).expect("block error");
    assert_eq!(response["id"], 7);
    assert_eq!(response["error"]["code"], -32001);
    assert_eq!(response["error"]["message"], "blocked by policy");
    assert_eq!(response["error"]["data"]["reason"], "domain:evil.example");

    assert!(h.child_stdin.try_recv().is_err());
}

#[tokio::test]
async fn child_crash_fails_pending_and_sessions_survive() {
    let mut h = harness();

    let s1 = h.store.create(ClientInfo::default());
    let s2 = h.store.create(ClientInfo::default());
    let sink1 = s1.attach_sink(SinkKind::Sse);
    let sink2 = s2.attach_sink(SinkKind::Sse);

    h.broker
        .route_from_client(&s1.session_id, json!({"jsonrpc": "2.0", "id": 11, "method": "a"}))
        .await
        .unwrap();
    h.broker
        .route_from_client(&s2.session_id, json!({"jsonrpc": "2.0", "id": 22, "method": "b"}))
        .await
        .unwrap();
    assert_eq!(h.broker.registry().len(), 2);

    h.broker
        .handle_upstream_event(UpstreamEvent::Exited { code: Some(137) })
        .await;

    let e1 = pop_payload(&sink1).expect("restart error for s1");
    assert_eq!(e1["id"], 11);
    assert_eq!(e1["error"]["code"], -32003);
    assert_eq!(e1["error"]["message"], "upstream restarted");

    let e2 = pop_payload(&sink2).expect("restart error for s2");
    assert_eq!(e2["id"], 22);
    assert_eq!(e2["error"]["code"], -32003);

    // Pending set is empty, sessions are intact
    assert!(h.broker.registry().is_empty());
    assert_eq!(h.store.count(), 2);

    // A new request proceeds normally after recovery
    h.broker
        .route_from_client(&s1.session_id, json!({"jsonrpc": "2.0", "id": 12, "method": "c"}))
        .await
        .unwrap();
    let forwarded = h.child_stdin.recv().await.unwrap();
    let bridge_id = forwarded["id"].as_u64().unwrap();
    h.broker
        .handle_upstream_event(UpstreamEvent::Message(
            json!({"jsonrpc": "2.0", "id": bridge_id, "result": "ok"}),
        ))
        .await;
    let ok = pop_payload(&sink1).unwrap();
    assert_eq!(ok["id"], 12);
    assert_eq!(ok["result"], "ok");
}

#[tokio::test]
async fn notification_broadcast_reaches_every_session_exactly_once() {
    let h = harness();

    let s1 = h.store.create(ClientInfo::default());
    let s2 = h.store.create(ClientInfo::default());
    let sink1 = s1.attach_sink(SinkKind::Sse);
    let sink2 = s2.attach_sink(SinkKind::Sse);

    let notification = json!({"jsonrpc": "2.0", "method": "log", "params": {"n": 1}});
    h.broker
        .handle_upstream_event(UpstreamEvent::Message(notification.clone()))
        .await;
    // No dedup: the same notification twice means two deliveries
    h.broker
        .handle_upstream_event(UpstreamEvent::Message(notification))
        .await;

    for sink in [&sink1, &sink2] {
        assert_eq!(sink.queue.len(), 2);
        let v = pop_payload(sink).unwrap();
        assert_eq!(v["method"], "log");
    }
}

#[tokio::test]
async fn slow_consumer_drops_oldest_then_closes() {
    // depth 4, hard cap 8
    let h = harness_with(FilterChain::new(), Catalog::new(), 4, 8);
    let session = h.store.create(ClientInfo::default());
    let sink = session.attach_sink(SinkKind::Sse);

    // Six notifications into a non-reading sink: two dropped, session open
    for i in 0..6 {
        h.broker
            .handle_upstream_event(UpstreamEvent::Message(
                json!({"jsonrpc": "2.0", "method": "n", "params": {"i": i}}),
            ))
            .await;
    }
    assert_eq!(h.metrics.snapshot()["messages"]["dropped_slow_consumer"], 2);
    assert!(!session.is_closed());

    // Sustained pressure past the hard cap closes the session
    for i in 6..20 {
        h.broker
            .handle_upstream_event(UpstreamEvent::Message(
                json!({"jsonrpc": "2.0", "method": "n", "params": {"i": i}}),
            ))
            .await;
    }
    assert!(session.is_closed());
    assert_eq!(
        session.close_reason().as_deref(),
        Some("slow_consumer"),
        "close reason"
    );
    assert_eq!(h.store.count(), 0);

    // The sink's queue ends with the end marker
    let mut saw_end = false;
    while let Some(message) = sink.queue.pop() {
        if let SinkMessage::End { reason } = message {
            assert_eq!(reason, "slow_consumer");
            saw_end = true;
        }
    }
    assert!(saw_end);
}

#[tokio::test]
async fn dead_upstream_answers_with_unavailable() {
    let mut h = harness();
    h.upstream.force_state(ChildState::Terminal);

    let session = h.store.create(ClientInfo::default());
    let sink = session.attach_sink(SinkKind::Sse);

    h.broker
        .route_from_client(&session.session_id, json!({"jsonrpc": "2.0", "id": 5, "method": "x"}))
        .await
        .unwrap();

    let response = pop_payload(&sink).expect("unavailable error");
    assert_eq!(response["error"]["code"], -32002);
    assert!(h.child_stdin.try_recv().is_err());
}

#[tokio::test]
async fn terminal_state_still_answers_discovery() {
    let catalog = Catalog::from_file(
        serde_json::from_str(r#"{"tools":[{"name":"t","inputSchema":{}}]}"#).unwrap(),
    );
    let h = harness_with(FilterChain::new(), catalog, 64, 128);
    h.upstream.force_state(ChildState::Terminal);

    let session = h.store.create(ClientInfo::default());
    let sink = session.attach_sink(SinkKind::Sse);

    h.broker
        .route_from_client(
            &session.session_id,
            json!({"jsonrpc": "2.0", "id": 9, "method": "tools/list"}),
        )
        .await
        .unwrap();

    let response = pop_payload(&sink).unwrap();
    assert_eq!(response["result"]["tools"][0]["name"], "t");
}

#[tokio::test]
async fn malformed_envelopes_answer_the_session() {
    let mut h = harness();
    let session = h.store.create(ClientInfo::default());
    let sink = session.attach_sink(SinkKind::Sse);

    // Batch arrays are rejected outright
    h.broker
        .route_from_client(&session.session_id, json!([{"jsonrpc": "2.0"}]))
        .await
        .unwrap();
    let response = pop_payload(&sink).unwrap();
    assert_eq!(response["error"]["code"], -32600);

    // Wrong version string
    h.broker
        .route_from_client(&session.session_id, json!({"jsonrpc": "1.0", "id": 1, "method": "x"}))
        .await
        .unwrap();
    let response = pop_payload(&sink).unwrap();
    assert_eq!(response["error"]["code"], -32600);
    assert_eq!(response["id"], 1);

    assert!(h.child_stdin.try_recv().is_err());
    // The session survived all of it
    assert!(!session.is_closed());
}

#[tokio::test]
async fn unknown_session_is_an_error() {
    let h = harness();
    let err = h
        .broker
        .route_from_client("missing", json!({"jsonrpc": "2.0", "id": 1, "method": "x"}))
        .await
        .unwrap_err();
    assert!(matches!(err, sb_types::AppError::SessionNotFound(_)));
}

#[tokio::test]
async fn initialize_is_bridge_answered_and_forwarded() {
    let mut h = harness();
    let session = h.store.create(ClientInfo::default());
    let sink = session.attach_sink(SinkKind::Sse);

    h.broker
        .route_from_client(
            &session.session_id,
            json!({"jsonrpc": "2.0", "id": "init-1", "method": "initialize", "params": {}}),
        )
        .await
        .unwrap();

    // The client sees the bridge's own capabilities immediately
    let response = pop_payload(&sink).expect("bridge initialize response");
    assert_eq!(response["id"], "init-1");
    assert_eq!(response["result"]["serverInfo"]["name"], "stdio-bridge");
    assert!(response["result"]["capabilities"].get("tools").is_some());

    // And the child still receives a (re-identified) initialize
    let forwarded = h.child_stdin.recv().await.unwrap();
    assert_eq!(forwarded["method"], "initialize");
    assert!(forwarded["id"].is_u64());

    // The child's answer feeds the catalog instead of any session
    let bridge_id = forwarded["id"].as_u64().unwrap();
    h.broker
        .handle_upstream_event(UpstreamEvent::Message(json!({
            "jsonrpc": "2.0", "id": bridge_id,
            "result": {"tools": [{"name": "from-child", "inputSchema": {}}]}
        })))
        .await;
    assert!(pop_payload(&sink).is_none(), "internal response must not surface");
    assert_eq!(h.broker.catalog().counts().0, 1);
}

#[tokio::test]
async fn request_deadline_times_out_exactly_once() {
    let metrics = Arc::new(BridgeMetrics::new());
    let store = Arc::new(SessionStore::new(
        metrics.clone(),
        64,
        128,
        Duration::from_secs(300),
        Duration::from_secs(15),
    ));
    let (upstream, _child_stdin) = UpstreamHandle::loopback(ChildState::Ready);
    let broker = Arc::new(Broker::new(
        store.clone(),
        Arc::new(sb_broker::RequestRegistry::new()),
        Arc::new(FilterChain::new()),
        Arc::new(Catalog::new()),
        metrics,
        upstream,
        BrokerOptions {
            request_deadline: Duration::from_millis(50),
            ..Default::default()
        },
    ));

    // Start the sweepers with a dummy upstream event stream
    let (_event_tx, event_rx) = tokio::sync::mpsc::channel(4);
    broker.start(event_rx);

    let session = store.create(ClientInfo::default());
    let sink = session.attach_sink(SinkKind::Sse);

    broker
        .route_from_client(&session.session_id, json!({"jsonrpc": "2.0", "id": 3, "method": "slow"}))
        .await
        .unwrap();
    assert_eq!(broker.registry().len(), 1);

    // Sweeper runs every second
    tokio::time::sleep(Duration::from_millis(1600)).await;

    let response = pop_payload(&sink).expect("timeout error");
    assert_eq!(response["id"], 3);
    assert_eq!(response["error"]["code"], -32000);
    assert_eq!(response["error"]["message"], "timeout");
    assert!(broker.registry().is_empty());
    assert!(pop_payload(&sink).is_none(), "exactly one error response");
}

//! The broker: central coordinator between network sessions and the child
//!
//! Two entry points: [`Broker::route_from_client`] for transport ingress and
//! [`Broker::handle_upstream_event`] for everything coming off the child.
//! Discovery is answered from the catalog before any forwarding; the filter
//! chain runs outbound before id rewriting and inbound before response
//! resolution.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use sb_config::{InitializeMode, ServerRequestRouting};
use sb_filters::{ChainOutcome, FilterChain, FilterDirection};
use sb_monitoring::BridgeMetrics;
use sb_protocol::JsonRpcError;
use sb_types::{AppError, AppResult};
use sb_upstream::{UpstreamEvent, UpstreamHandle};

use crate::catalog::Catalog;
use crate::registry::{PendingRequest, RequestRegistry};
use crate::session::{QueuePush, Session, SessionStore, REASON_SLOW_CONSUMER};

/// Broker policy knobs
#[derive(Debug, Clone)]
pub struct BrokerOptions {
    pub request_deadline: Duration,
    pub initialize_mode: InitializeMode,
    pub server_request_routing: ServerRequestRouting,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            request_deadline: Duration::from_secs(60),
            initialize_mode: InitializeMode::Both,
            server_request_routing: ServerRequestRouting::Broadcast,
        }
    }
}

pub struct Broker {
    store: Arc<SessionStore>,
    registry: Arc<RequestRegistry>,
    chain: Arc<FilterChain>,
    catalog: Arc<Catalog>,
    metrics: Arc<BridgeMetrics>,
    upstream: UpstreamHandle,
    options: BrokerOptions,
}

fn success_response(id: Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn error_response(id: Value, error: JsonRpcError) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": error})
}

impl Broker {
    pub fn new(
        store: Arc<SessionStore>,
        registry: Arc<RequestRegistry>,
        chain: Arc<FilterChain>,
        catalog: Arc<Catalog>,
        metrics: Arc<BridgeMetrics>,
        upstream: UpstreamHandle,
        options: BrokerOptions,
    ) -> Self {
        Self {
            store,
            registry,
            chain,
            catalog,
            metrics,
            upstream,
            options,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<RequestRegistry> {
        &self.registry
    }

    pub fn chain(&self) -> &Arc<FilterChain> {
        &self.chain
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn metrics(&self) -> &Arc<BridgeMetrics> {
        &self.metrics
    }

    pub fn upstream(&self) -> &UpstreamHandle {
        &self.upstream
    }

    /// Spawn the long-lived broker tasks: the upstream event pump, the
    /// registry deadline sweeper, and the session idle sweeper
    pub fn start(self: &Arc<Self>, mut events: mpsc::Receiver<UpstreamEvent>) {
        let broker = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                broker.handle_upstream_event(event).await;
            }
            debug!("upstream event stream ended");
        });

        let broker = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                for (bridge_id, entry) in broker.registry.sweep_expired() {
                    if entry.internal {
                        continue;
                    }
                    broker
                        .metrics
                        .requests_timed_out
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "request {} ({}) for session {} timed out",
                        bridge_id, entry.method, entry.session_id
                    );
                    if let Some(session) = broker.store.get(&entry.session_id) {
                        broker.deliver_response(
                            &session,
                            error_response(entry.original_id, JsonRpcError::timeout()),
                        );
                    }
                }
            }
        });

        let broker = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5));
            loop {
                interval.tick().await;
                for session_id in broker.store.sweep_idle() {
                    broker.registry.drop_session(&session_id);
                }
            }
        });
    }

    /// Graceful teardown: end every session and stop the child
    pub fn shutdown(&self) {
        info!("broker shutting down");
        self.store.close_all("shutting down");
        self.upstream.shutdown();
    }

    /// Ingress from a transport: one message from one session's client
    pub async fn route_from_client(&self, session_id: &str, message: Value) -> AppResult<()> {
        let session = self
            .store
            .get(session_id)
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;
        session.touch();
        self.metrics
            .messages_from_clients
            .fetch_add(1, Ordering::Relaxed);

        // Envelope validation; violations answer the session, never the child
        if message.is_array() {
            self.deliver_response(
                &session,
                error_response(
                    Value::Null,
                    JsonRpcError::invalid_request("batch requests are not supported"),
                ),
            );
            return Ok(());
        }
        let Some(obj) = message.as_object() else {
            self.deliver_response(
                &session,
                error_response(
                    Value::Null,
                    JsonRpcError::invalid_request("message must be a JSON object"),
                ),
            );
            return Ok(());
        };
        let client_id = obj.get("id").cloned();
        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            self.deliver_response(
                &session,
                error_response(
                    client_id.unwrap_or(Value::Null),
                    JsonRpcError::invalid_request("jsonrpc must be \"2.0\""),
                ),
            );
            return Ok(());
        }

        let method = obj.get("method").and_then(Value::as_str).map(str::to_string);

        // Discovery short-circuit: answered without touching the child
        if let Some(m) = method.as_deref() {
            if m == "initialize" && self.options.initialize_mode != InitializeMode::Child {
                self.deliver_response(
                    &session,
                    success_response(
                        client_id.clone().unwrap_or(Value::Null),
                        self.bridge_initialize_result(),
                    ),
                );
                self.metrics
                    .discovery_short_circuits
                    .fetch_add(1, Ordering::Relaxed);
                if self.options.initialize_mode == InitializeMode::Both {
                    self.forward_internal(message).await;
                }
                return Ok(());
            }

            if let (Some(result), Some(id)) = (self.catalog.respond(m), client_id.clone()) {
                self.deliver_response(&session, success_response(id, result));
                self.metrics
                    .discovery_short_circuits
                    .fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        }

        // Outbound filter chain
        let message = match self
            .chain
            .apply(FilterDirection::Outbound, session_id, message)
        {
            ChainOutcome::Forward(v) => v,
            ChainOutcome::Drop { .. } => {
                self.metrics.filter_drops.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            ChainOutcome::Block { error, .. } => {
                self.metrics.filter_blocks.fetch_add(1, Ordering::Relaxed);
                self.deliver_response(
                    &session,
                    error_response(client_id.unwrap_or(Value::Null), error),
                );
                return Ok(());
            }
        };

        if !self.upstream.is_available() {
            if let Some(id) = client_id.filter(|v| !v.is_null()) {
                self.deliver_response(&session, error_response(id, JsonRpcError::upstream_unavailable()));
            }
            return Ok(());
        }

        // Requests get a bridge-scoped id; notifications and client
        // responses pass through untouched
        let mut message = message;
        if method.is_some() {
            if let Some(original_id) = message.get("id").cloned().filter(|v| !v.is_null()) {
                let bridge_id = self.registry.next_bridge_id();
                self.registry.register(
                    bridge_id,
                    PendingRequest::new(
                        session_id,
                        original_id,
                        method.unwrap_or_default(),
                        self.options.request_deadline,
                    ),
                );
                message["id"] = Value::from(bridge_id);
            }
        }

        self.upstream.send(message).await?;
        self.metrics.messages_to_child.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Forward a message upstream on the bridge's own behalf; the response
    /// is consumed internally (it feeds the lazy catalog)
    async fn forward_internal(&self, mut message: Value) {
        if !self.upstream.is_available() {
            return;
        }
        let bridge_id = self.registry.next_bridge_id();
        self.registry.register(
            bridge_id,
            PendingRequest::internal("initialize", self.options.request_deadline),
        );
        message["id"] = Value::from(bridge_id);
        match self.upstream.send(message).await {
            Ok(()) => {
                self.metrics.messages_to_child.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => debug!("fire-and-forget forward failed: {}", e),
        }
    }

    /// Ingress from the supervisor: frames, framing errors, child exits
    pub async fn handle_upstream_event(&self, event: UpstreamEvent) {
        match event {
            UpstreamEvent::Message(value) => self.route_from_upstream(value),
            UpstreamEvent::FrameError(e) => {
                self.metrics.frame_errors.fetch_add(1, Ordering::Relaxed);
                warn!("upstream framing error: {}", e);
            }
            UpstreamEvent::Exited { code } => {
                self.metrics.child_restarts.fetch_add(1, Ordering::Relaxed);
                let failed = self.registry.fail_all();
                let mut surfaced = 0u64;
                for (_, entry) in failed {
                    if entry.internal {
                        continue;
                    }
                    surfaced += 1;
                    if let Some(session) = self.store.get(&entry.session_id) {
                        self.deliver_response(
                            &session,
                            error_response(entry.original_id, JsonRpcError::upstream_restarted()),
                        );
                    }
                }
                self.metrics
                    .requests_failed_by_restart
                    .fetch_add(surfaced, Ordering::Relaxed);
                warn!(
                    "upstream exited (code {:?}); failed {} pending requests, sessions survive",
                    code, surfaced
                );
            }
            UpstreamEvent::SpawnFailed(e) => {
                error!("upstream spawn failed: {}", e);
            }
        }
    }

    fn route_from_upstream(&self, value: Value) {
        self.metrics
            .messages_from_child
            .fetch_add(1, Ordering::Relaxed);

        let has_method = value.get("method").is_some();
        let has_id = value.get("id").map(|v| !v.is_null()).unwrap_or(false);

        if !has_method && value.get("id").is_some() {
            self.route_response(value);
            return;
        }

        if has_method && !has_id {
            self.broadcast(value);
            self.metrics
                .notifications_broadcast
                .fetch_add(1, Ordering::Relaxed);
            return;
        }

        if has_method && has_id {
            // Server-initiated request
            match self.options.server_request_routing {
                ServerRequestRouting::Broadcast => {
                    self.broadcast(value);
                    self.metrics
                        .notifications_broadcast
                        .fetch_add(1, Ordering::Relaxed);
                }
                ServerRequestRouting::Drop => {
                    debug!("dropping server-initiated request per routing policy");
                }
            }
            return;
        }

        warn!("unclassifiable upstream message discarded");
    }

    fn route_response(&self, value: Value) {
        let Some(bridge_id) = value.get("id").and_then(Value::as_u64) else {
            warn!("upstream response with foreign id {:?}", value.get("id"));
            self.metrics
                .responses_unmatched
                .fetch_add(1, Ordering::Relaxed);
            self.upstream.mark_degraded();
            return;
        };

        // Inbound filters run before resolution; the owning session is
        // peeked so filters see the right context
        let session_id = self.registry.peek_session(bridge_id).unwrap_or_default();
        let filtered = match self
            .chain
            .apply(FilterDirection::Inbound, &session_id, value)
        {
            ChainOutcome::Forward(v) => v,
            ChainOutcome::Drop { .. } => {
                // Entry stays; the deadline sweeper answers the client
                self.metrics.filter_drops.fetch_add(1, Ordering::Relaxed);
                return;
            }
            ChainOutcome::Block { error, .. } => {
                self.metrics.filter_blocks.fetch_add(1, Ordering::Relaxed);
                if let Some(entry) = self.registry.resolve(bridge_id) {
                    if !entry.internal {
                        if let Some(session) = self.store.get(&entry.session_id) {
                            self.deliver_response(
                                &session,
                                error_response(entry.original_id, error),
                            );
                        }
                    }
                }
                return;
            }
        };

        match self.registry.resolve(bridge_id) {
            Some(entry) if entry.internal => {
                if let Some(result) = filtered.get("result") {
                    self.catalog.merge_from_initialize(result);
                }
            }
            Some(entry) => {
                let mut response = filtered;
                response["id"] = entry.original_id;
                self.metrics.responses_routed.fetch_add(1, Ordering::Relaxed);
                match self.store.get(&entry.session_id) {
                    Some(session) => self.deliver_response(&session, response),
                    // Session closed while the request was in flight
                    None => debug!("dropping response for closed session {}", entry.session_id),
                }
            }
            None => {
                warn!("upstream response with unknown bridge id {}", bridge_id);
                self.metrics
                    .responses_unmatched
                    .fetch_add(1, Ordering::Relaxed);
                self.upstream.mark_degraded();
            }
        }
    }

    /// One filtered copy per live session
    fn broadcast(&self, value: Value) {
        for session in self.store.all() {
            match self
                .chain
                .apply(FilterDirection::Inbound, &session.session_id, value.clone())
            {
                ChainOutcome::Forward(v) => {
                    let push = session.enqueue_notification(v);
                    self.handle_push(&session, push);
                }
                ChainOutcome::Drop { .. } => {
                    self.metrics.filter_drops.fetch_add(1, Ordering::Relaxed);
                }
                ChainOutcome::Block { .. } => {
                    // No originator to answer on a broadcast
                    self.metrics.filter_blocks.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    fn deliver_response(&self, session: &Arc<Session>, value: Value) {
        let push = session.enqueue_response(value);
        self.handle_push(session, push);
    }

    fn handle_push(&self, session: &Arc<Session>, push: QueuePush) {
        match push {
            QueuePush::Queued => {}
            QueuePush::DroppedOldest => {
                self.metrics
                    .messages_dropped_slow_consumer
                    .fetch_add(1, Ordering::Relaxed);
            }
            QueuePush::HardCapExceeded => {
                self.metrics
                    .messages_dropped_slow_consumer
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    "session {} exceeded hard queue cap, closing",
                    session.session_id
                );
                self.store.close(&session.session_id, REASON_SLOW_CONSUMER);
                self.registry.drop_session(&session.session_id);
            }
        }
    }

    fn bridge_initialize_result(&self) -> Value {
        json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {
                "tools": {},
                "resources": {},
                "prompts": {},
                "logging": {}
            },
            "serverInfo": {
                "name": "stdio-bridge",
                "version": env!("CARGO_PKG_VERSION")
            }
        })
    }
}

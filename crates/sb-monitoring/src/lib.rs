//! In-memory metrics collection
//!
//! Process-lifetime counters for the bridge, exposed as a JSON snapshot on
//! `/metrics` and folded into `/health`. All counters are atomics; there is
//! no time-series retention.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Counter/gauge registry shared across the bridge
#[derive(Debug)]
pub struct BridgeMetrics {
    started_at: Instant,

    pub sessions_created: AtomicU64,
    pub sessions_closed: AtomicU64,

    pub messages_from_clients: AtomicU64,
    pub messages_to_child: AtomicU64,
    pub messages_from_child: AtomicU64,

    pub responses_routed: AtomicU64,
    pub responses_unmatched: AtomicU64,
    pub notifications_broadcast: AtomicU64,
    pub discovery_short_circuits: AtomicU64,

    pub requests_timed_out: AtomicU64,
    pub requests_failed_by_restart: AtomicU64,

    pub messages_dropped_slow_consumer: AtomicU64,
    pub sessions_closed_slow_consumer: AtomicU64,

    pub filter_drops: AtomicU64,
    pub filter_blocks: AtomicU64,
    pub filter_transforms: AtomicU64,

    pub child_restarts: AtomicU64,
    pub frame_errors: AtomicU64,

    http_in_flight: AtomicUsize,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            sessions_created: AtomicU64::new(0),
            sessions_closed: AtomicU64::new(0),
            messages_from_clients: AtomicU64::new(0),
            messages_to_child: AtomicU64::new(0),
            messages_from_child: AtomicU64::new(0),
            responses_routed: AtomicU64::new(0),
            responses_unmatched: AtomicU64::new(0),
            notifications_broadcast: AtomicU64::new(0),
            discovery_short_circuits: AtomicU64::new(0),
            requests_timed_out: AtomicU64::new(0),
            requests_failed_by_restart: AtomicU64::new(0),
            messages_dropped_slow_consumer: AtomicU64::new(0),
            sessions_closed_slow_consumer: AtomicU64::new(0),
            filter_drops: AtomicU64::new(0),
            filter_blocks: AtomicU64::new(0),
            filter_transforms: AtomicU64::new(0),
            child_restarts: AtomicU64::new(0),
            frame_errors: AtomicU64::new(0),
            http_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn uptime_s(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Current number of in-flight HTTP ingress requests
    pub fn http_in_flight(&self) -> usize {
        self.http_in_flight.load(Ordering::Relaxed)
    }

    /// Try to claim an in-flight slot; `None` when the cap is reached
    pub fn try_acquire_in_flight(self: &Arc<Self>, cap: usize) -> Option<InFlightGuard> {
        let prev = self.http_in_flight.fetch_add(1, Ordering::SeqCst);
        if prev >= cap {
            self.http_in_flight.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(InFlightGuard {
            metrics: self.clone(),
        })
    }

    /// JSON snapshot for `/metrics`
    pub fn snapshot(&self) -> serde_json::Value {
        let c = |v: &AtomicU64| v.load(Ordering::Relaxed);
        serde_json::json!({
            "uptime_s": self.uptime_s(),
            "sessions": {
                "created": c(&self.sessions_created),
                "closed": c(&self.sessions_closed),
                "closed_slow_consumer": c(&self.sessions_closed_slow_consumer),
            },
            "messages": {
                "from_clients": c(&self.messages_from_clients),
                "to_child": c(&self.messages_to_child),
                "from_child": c(&self.messages_from_child),
                "dropped_slow_consumer": c(&self.messages_dropped_slow_consumer),
            },
            "routing": {
                "responses_routed": c(&self.responses_routed),
                "responses_unmatched": c(&self.responses_unmatched),
                "notifications_broadcast": c(&self.notifications_broadcast),
                "discovery_short_circuits": c(&self.discovery_short_circuits),
                "requests_timed_out": c(&self.requests_timed_out),
                "requests_failed_by_restart": c(&self.requests_failed_by_restart),
            },
            "filters": {
                "drops": c(&self.filter_drops),
                "blocks": c(&self.filter_blocks),
                "transforms": c(&self.filter_transforms),
            },
            "upstream": {
                "restarts": c(&self.child_restarts),
                "frame_errors": c(&self.frame_errors),
            },
            "http_in_flight": self.http_in_flight(),
        })
    }
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for the HTTP in-flight gauge
pub struct InFlightGuard {
    metrics: Arc<BridgeMetrics>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.metrics.http_in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

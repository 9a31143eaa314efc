//! In-flight request registry
//!
//! Every client request forwarded upstream gets a bridge-scoped numeric id
//! from a monotonic counter; the registry remembers the originating session
//! and the client's original id until the matching response arrives, the
//! deadline expires, or the session goes away.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

/// One in-flight outbound request
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub session_id: String,
    /// The id exactly as the client sent it
    pub original_id: Value,
    pub method: String,
    pub submitted_at: Instant,
    pub deadline: Instant,
    /// Bridge-internal requests (e.g. the forwarded initialize); their
    /// responses are consumed by the bridge, never routed to a session
    pub internal: bool,
}

#[derive(Default)]
pub struct RequestRegistry {
    pending: Mutex<HashMap<u64, PendingRequest>>,
    next_id: AtomicU64,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate the next bridge id; unique for the life of the process
    pub fn next_bridge_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn register(&self, bridge_id: u64, entry: PendingRequest) {
        self.pending.lock().insert(bridge_id, entry);
    }

    /// Remove and return the entry for an upstream response
    pub fn resolve(&self, bridge_id: u64) -> Option<PendingRequest> {
        self.pending.lock().remove(&bridge_id)
    }

    /// Owning session without removing the entry (filter context)
    pub fn peek_session(&self, bridge_id: u64) -> Option<String> {
        self.pending
            .lock()
            .get(&bridge_id)
            .map(|entry| entry.session_id.clone())
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Remove and return all entries past their deadline
    pub fn sweep_expired(&self) -> Vec<(u64, PendingRequest)> {
        let now = Instant::now();
        let mut pending = self.pending.lock();
        let expired: Vec<u64> = pending
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| pending.remove(&id).map(|entry| (id, entry)))
            .collect()
    }

    /// Drain every entry (used when the child restarts)
    pub fn fail_all(&self) -> Vec<(u64, PendingRequest)> {
        self.pending.lock().drain().collect()
    }

    /// Drop all entries owned by a session; their responses are discarded
    pub fn drop_session(&self, session_id: &str) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, entry| entry.session_id != session_id);
        before - pending.len()
    }
}

impl PendingRequest {
    pub fn new(
        session_id: impl Into<String>,
        original_id: Value,
        method: impl Into<String>,
        deadline: Duration,
    ) -> Self {
        let now = Instant::now();
        Self {
            session_id: session_id.into(),
            original_id,
            method: method.into(),
            submitted_at: now,
            deadline: now + deadline,
            internal: false,
        }
    }

    pub fn internal(method: impl Into<String>, deadline: Duration) -> Self {
        let now = Instant::now();
        Self {
            session_id: String::new(),
            original_id: Value::Null,
            method: method.into(),
            submitted_at: now,
            deadline: now + deadline,
            internal: true,
        }
    }
}

//! Ordered filter chain with runtime on/off control
//!
//! Filters are registered once at startup in a fixed order; only the
//! per-entry enabled flag changes at runtime. The chain halts on the first
//! non-Pass result. Every non-Pass outcome is audit-logged with content
//! hashes (bodies themselves are never logged).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::{FilterDirection, FilterInfo, FilterResult, MessageFilter};
use sb_protocol::JsonRpcError;
use sb_types::{AppError, AppResult};

struct FilterEntry {
    filter: Arc<dyn MessageFilter>,
    enabled: AtomicBool,
}

/// Result of running the whole chain on one message
#[derive(Debug)]
pub enum ChainOutcome {
    /// Forward this (possibly rewritten) message
    Forward(Value),
    /// Discard silently
    Drop { filter: String, reason: String },
    /// Discard and answer the originator with this error
    Block {
        filter: String,
        error: JsonRpcError,
    },
}

#[derive(Default)]
pub struct FilterChain {
    entries: Vec<FilterEntry>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a filter at the end of the chain
    ///
    /// Order is part of configuration; there is no runtime re-ordering or
    /// removal.
    pub fn register(&mut self, filter: Arc<dyn MessageFilter>, enabled: bool) {
        self.entries.push(FilterEntry {
            filter,
            enabled: AtomicBool::new(enabled),
        });
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> AppResult<()> {
        for entry in &self.entries {
            if entry.filter.name() == name {
                entry.enabled.store(enabled, Ordering::SeqCst);
                info!("filter {} {}", name, if enabled { "enabled" } else { "disabled" });
                return Ok(());
            }
        }
        Err(AppError::InvalidParams(format!("unknown filter: {}", name)))
    }

    pub fn list(&self) -> Vec<FilterInfo> {
        self.entries
            .iter()
            .map(|entry| FilterInfo {
                name: entry.filter.name().to_string(),
                enabled: entry.enabled.load(Ordering::SeqCst),
                direction_mask: entry.filter.direction_mask(),
                description: Some(entry.filter.description().to_string())
                    .filter(|d| !d.is_empty()),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Per-filter counter snapshot keyed by filter name
    pub fn metrics(&self) -> Value {
        let mut map = serde_json::Map::new();
        for entry in &self.entries {
            map.insert(entry.filter.name().to_string(), entry.filter.metrics());
        }
        Value::Object(map)
    }

    /// Run every enabled, direction-matching filter over the message
    pub fn apply(
        &self,
        direction: FilterDirection,
        session_id: &str,
        message: Value,
    ) -> ChainOutcome {
        let mut current = message;
        for entry in &self.entries {
            if !entry.enabled.load(Ordering::SeqCst) {
                continue;
            }
            if !entry.filter.direction_mask().matches(direction) {
                continue;
            }
            let name = entry.filter.name();
            match entry.filter.apply(direction, session_id, &current) {
                FilterResult::Pass => {}
                FilterResult::Transform(next) => {
                    info!(
                        session_id,
                        filter = name,
                        action = "transform",
                        original_hash = %content_hash(&current),
                        filtered_hash = %content_hash(&next),
                        "filter rewrote message"
                    );
                    current = next;
                }
                FilterResult::Drop { reason } => {
                    warn!(
                        session_id,
                        filter = name,
                        action = "drop",
                        reason = %reason,
                        original_hash = %content_hash(&current),
                        "filter dropped message"
                    );
                    return ChainOutcome::Drop {
                        filter: name.to_string(),
                        reason,
                    };
                }
                FilterResult::Block { error } => {
                    warn!(
                        session_id,
                        filter = name,
                        action = "block",
                        code = error.code,
                        original_hash = %content_hash(&current),
                        "filter blocked message"
                    );
                    return ChainOutcome::Block {
                        filter: name.to_string(),
                        error,
                    };
                }
            }
        }
        ChainOutcome::Forward(current)
    }
}

fn content_hash(value: &Value) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    // First 16 hex chars are plenty for correlating audit lines
    let mut out = String::with_capacity(16);
    for b in digest.iter().take(8) {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DirectionMask;
    use serde_json::json;

    struct Upper;
    impl MessageFilter for Upper {
        fn name(&self) -> &'static str {
            "upper"
        }
        fn direction_mask(&self) -> DirectionMask {
            DirectionMask::Outbound
        }
        fn apply(&self, _: FilterDirection, _: &str, message: &Value) -> FilterResult {
            let mut next = message.clone();
            if let Some(m) = next.get("method").and_then(Value::as_str) {
                let upper = m.to_uppercase();
                next["method"] = Value::String(upper);
                return FilterResult::Transform(next);
            }
            FilterResult::Pass
        }
    }

    struct DropAll;
    impl MessageFilter for DropAll {
        fn name(&self) -> &'static str {
            "drop_all"
        }
        fn direction_mask(&self) -> DirectionMask {
            DirectionMask::Both
        }
        fn apply(&self, _: FilterDirection, _: &str, _: &Value) -> FilterResult {
            FilterResult::Drop {
                reason: "test".to_string(),
            }
        }
    }

    #[test]
    fn test_chain_order_and_transform() {
        let mut chain = FilterChain::new();
        chain.register(Arc::new(Upper), true);

        let out = chain.apply(
            FilterDirection::Outbound,
            "s1",
            json!({"method": "ping"}),
        );
        match out {
            ChainOutcome::Forward(v) => assert_eq!(v["method"], "PING"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_disabled_filter_is_skipped() {
        let mut chain = FilterChain::new();
        chain.register(Arc::new(DropAll), false);

        let out = chain.apply(FilterDirection::Inbound, "s1", json!({"method": "x"}));
        assert!(matches!(out, ChainOutcome::Forward(_)));
    }

    #[test]
    fn test_direction_mask_respected() {
        let mut chain = FilterChain::new();
        chain.register(Arc::new(Upper), true);

        // Upper only handles outbound; inbound passes untouched
        let out = chain.apply(FilterDirection::Inbound, "s1", json!({"method": "ping"}));
        match out {
            ChainOutcome::Forward(v) => assert_eq!(v["method"], "ping"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_drop_halts_chain() {
        let mut chain = FilterChain::new();
        chain.register(Arc::new(DropAll), true);
        chain.register(Arc::new(Upper), true);

        let out = chain.apply(
            FilterDirection::Outbound,
            "s1",
            json!({"method": "ping"}),
        );
        assert!(matches!(out, ChainOutcome::Drop { .. }));
    }

    #[test]
    fn test_toggle_is_idempotent() {
        let mut chain = FilterChain::new();
        chain.register(Arc::new(DropAll), false);

        for _ in 0..5 {
            chain.set_enabled("drop_all", true).unwrap();
        }
        assert!(chain.list()[0].enabled);
        assert!(chain.set_enabled("missing", true).is_err());
    }

    #[test]
    fn test_deterministic_under_fixed_config() {
        let mut chain = FilterChain::new();
        chain.register(Arc::new(Upper), true);

        let input = json!({"method": "ping", "id": 1});
        let a = chain.apply(FilterDirection::Outbound, "s1", input.clone());
        let b = chain.apply(FilterDirection::Outbound, "s1", input);
        match (a, b) {
            (ChainOutcome::Forward(x), ChainOutcome::Forward(y)) => assert_eq!(x, y),
            _ => panic!("expected forwards"),
        }
    }
}

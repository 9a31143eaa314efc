//! Blacklist filter: blocks outbound messages whose content matches
//! configured domains, keywords, or regex patterns

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use super::ContentState;
use crate::builtin::collect_strings;
use crate::{DirectionMask, FilterDirection, FilterResult, MessageFilter};
use sb_protocol::JsonRpcError;

pub struct BlacklistFilter {
    state: Arc<ContentState>,
    /// Hits per rule, keyed by the audit reason string
    hits: DashMap<String, u64>,
}

impl BlacklistFilter {
    pub fn new(state: Arc<ContentState>) -> Self {
        Self {
            state,
            hits: DashMap::new(),
        }
    }

    fn record(&self, reason: &str) {
        *self.hits.entry(reason.to_string()).or_insert(0) += 1;
    }

    /// First matching rule, as the audit reason string
    fn find_violation(&self, message: &Value) -> Option<String> {
        let snapshot = self.state.load();
        let mut strings = Vec::new();
        collect_strings(message, &mut strings);

        for content in &strings {
            let lower = content.to_lowercase();
            for domain in &snapshot.config.blocked_domains {
                if lower.contains(&domain.to_lowercase()) {
                    return Some(format!("domain:{}", domain));
                }
            }
            for keyword in &snapshot.config.blocked_keywords {
                if lower.contains(&keyword.to_lowercase()) {
                    return Some(format!("keyword:{}", keyword));
                }
            }
            for (raw, re) in &snapshot.blocked_patterns {
                if re.is_match(content) {
                    return Some(format!("pattern:{}", raw));
                }
            }
        }
        None
    }
}

impl MessageFilter for BlacklistFilter {
    fn name(&self) -> &'static str {
        "blacklist"
    }

    fn description(&self) -> &'static str {
        "Blocks requests matching configured domains, keywords, or patterns"
    }

    fn direction_mask(&self) -> DirectionMask {
        DirectionMask::Outbound
    }

    fn apply(&self, _: FilterDirection, _: &str, message: &Value) -> FilterResult {
        match self.find_violation(message) {
            Some(reason) => {
                self.record(&reason);
                FilterResult::Block {
                    error: JsonRpcError::blocked_by_policy(reason),
                }
            }
            None => FilterResult::Pass,
        }
    }

    fn metrics(&self) -> Value {
        let mut rules = serde_json::Map::new();
        for entry in self.hits.iter() {
            rules.insert(entry.key().clone(), Value::from(*entry.value()));
        }
        serde_json::json!({ "blocked": rules })
    }
}

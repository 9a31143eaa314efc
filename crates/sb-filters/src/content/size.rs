//! Size manager: summarizes or truncates oversized inbound string fields

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;

use super::ContentState;
use crate::builtin::map_strings;
use crate::{DirectionMask, FilterDirection, FilterResult, MessageFilter};

/// Sentences kept when summarizing
const SUMMARY_SENTENCES: usize = 3;

pub struct SizeManager {
    state: Arc<ContentState>,
    summaries: AtomicU64,
    truncations: AtomicU64,
}

impl SizeManager {
    pub fn new(state: Arc<ContentState>) -> Self {
        Self {
            state,
            summaries: AtomicU64::new(0),
            truncations: AtomicU64::new(0),
        }
    }

    fn shrink(&self, s: &str) -> Option<String> {
        let snapshot = self.state.load();
        let config = &snapshot.config;

        if s.len() > config.hard_truncate {
            self.truncations.fetch_add(1, Ordering::Relaxed);
            return Some(format!("[TRUNCATED] (original length {})", s.len()));
        }
        if s.len() > config.summarize_threshold {
            self.summaries.fetch_add(1, Ordering::Relaxed);
            return Some(summarize(s, config.summarize_threshold, s.len()));
        }
        None
    }
}

/// First few sentences, capped at the threshold, plus a truncation note
fn summarize(s: &str, cap: usize, original_len: usize) -> String {
    let mut head = String::new();
    let mut sentences = 0;
    for part in s.split_inclusive(". ") {
        if head.len() + part.len() > cap || sentences >= SUMMARY_SENTENCES {
            break;
        }
        head.push_str(part);
        sentences += 1;
    }
    if head.is_empty() {
        // No sentence breaks near the front; fall back to a char-safe prefix
        let cut = s
            .char_indices()
            .take_while(|(i, _)| *i < cap)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        head.push_str(&s[..cut]);
    }
    format!(
        "{} … [truncated, original length {}]",
        head.trim_end(),
        original_len
    )
}

impl MessageFilter for SizeManager {
    fn name(&self) -> &'static str {
        "size_manager"
    }

    fn description(&self) -> &'static str {
        "Summarizes or truncates oversized response fields"
    }

    fn direction_mask(&self) -> DirectionMask {
        DirectionMask::Inbound
    }

    fn apply(&self, _: FilterDirection, _: &str, message: &Value) -> FilterResult {
        let (next, field_changed) = map_strings(message, &|s| self.shrink(s));

        // Whole-message budget on top of the per-field rules
        let snapshot = self.state.load();
        let budget = snapshot.config.max_response_length;
        let mut strings = Vec::new();
        crate::builtin::collect_strings(&next, &mut strings);
        let total: usize = strings.iter().map(|s| s.len()).sum();

        if total <= budget {
            return if field_changed {
                FilterResult::Transform(next)
            } else {
                FilterResult::Pass
            };
        }

        self.truncations.fetch_add(1, Ordering::Relaxed);
        let used = std::cell::Cell::new(0usize);
        let (capped, _) = map_strings(&next, &|s| {
            let remaining = budget.saturating_sub(used.get());
            if remaining == 0 {
                if s.is_empty() {
                    return None;
                }
                return Some("[TRUNCATED]".to_string());
            }
            if s.len() <= remaining {
                used.set(used.get() + s.len());
                return None;
            }
            let cut = s
                .char_indices()
                .take_while(|(i, _)| *i < remaining)
                .last()
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(0);
            used.set(budget);
            Some(format!("{}[TRUNCATED]", &s[..cut]))
        });
        FilterResult::Transform(capped)
    }

    fn metrics(&self) -> Value {
        serde_json::json!({
            "summaries": self.summaries.load(Ordering::Relaxed),
            "truncations": self.truncations.load(Ordering::Relaxed),
        })
    }
}

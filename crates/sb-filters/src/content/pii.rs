//! PII redactor: replaces emails, phone numbers, SSNs, and credit-card
//! shaped digit groups with fixed markers
//!
//! Long base64 runs are exempt so encoded payloads do not get corrupted by
//! false positives.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use super::ContentState;
use crate::builtin::map_strings;
use crate::{DirectionMask, FilterDirection, FilterResult, MessageFilter};

pub const EMAIL_MARKER: &str = "[EMAIL_REDACTED]";
pub const PHONE_MARKER: &str = "[PHONE_REDACTED]";
pub const SSN_MARKER: &str = "[SSN_REDACTED]";
pub const CREDIT_CARD_MARKER: &str = "[CREDIT_CARD_REDACTED]";

pub struct PiiRedactor {
    state: Arc<ContentState>,

    email: Regex,
    phone: Regex,
    ssn: Regex,
    credit_card: Regex,

    emails: AtomicU64,
    phones: AtomicU64,
    ssns: AtomicU64,
    credit_cards: AtomicU64,
}

impl PiiRedactor {
    pub fn new(state: Arc<ContentState>) -> Self {
        Self {
            state,
            email: Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
                .expect("static pattern"),
            phone: Regex::new(r"\b(?:\+?1[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b")
                .expect("static pattern"),
            ssn: Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("static pattern"),
            credit_card: Regex::new(
                r"\b(?:4[0-9]{12}(?:[0-9]{3})?|5[1-5][0-9]{14}|3[47][0-9]{13}|6(?:011|5[0-9]{2})[0-9]{12})\b",
            )
            .expect("static pattern"),
            emails: AtomicU64::new(0),
            phones: AtomicU64::new(0),
            ssns: AtomicU64::new(0),
            credit_cards: AtomicU64::new(0),
        }
    }

    fn redact(&self, s: &str) -> Option<String> {
        let snapshot = self.state.load();
        let config = &snapshot.config;

        let mut current = s.to_string();
        let mut changed = false;

        // Redaction passes in fixed order; SSNs before the phone pass would
        // not matter (shapes are disjoint) but keeping one order keeps the
        // chain deterministic
        let passes: [(bool, &Regex, &str, &AtomicU64); 4] = [
            (config.redact_emails, &self.email, EMAIL_MARKER, &self.emails),
            (config.redact_ssns, &self.ssn, SSN_MARKER, &self.ssns),
            (
                config.redact_credit_cards,
                &self.credit_card,
                CREDIT_CARD_MARKER,
                &self.credit_cards,
            ),
            (config.redact_phones, &self.phone, PHONE_MARKER, &self.phones),
        ];

        for (enabled, pattern, marker, counter) in passes {
            if !enabled {
                continue;
            }
            let (next, count) =
                replace_outside_exempt(&current, pattern, marker, &snapshot.base64_run);
            if count > 0 {
                counter.fetch_add(count, Ordering::Relaxed);
                current = next;
                changed = true;
            }
        }

        changed.then_some(current)
    }
}

/// Replace pattern matches, skipping any match that overlaps a base64 run
fn replace_outside_exempt(
    s: &str,
    pattern: &Regex,
    marker: &str,
    exempt: &Regex,
) -> (String, u64) {
    let exempt_spans: Vec<(usize, usize)> =
        exempt.find_iter(s).map(|m| (m.start(), m.end())).collect();

    let mut out = String::with_capacity(s.len());
    let mut cursor = 0;
    let mut count = 0u64;

    for m in pattern.find_iter(s) {
        let overlaps = exempt_spans
            .iter()
            .any(|&(start, end)| m.start() < end && m.end() > start);
        if overlaps {
            continue;
        }
        out.push_str(&s[cursor..m.start()]);
        out.push_str(marker);
        cursor = m.end();
        count += 1;
    }
    out.push_str(&s[cursor..]);
    (out, count)
}

impl MessageFilter for PiiRedactor {
    fn name(&self) -> &'static str {
        "pii_redactor"
    }

    fn description(&self) -> &'static str {
        "Replaces emails, phones, SSNs, and card numbers with fixed markers"
    }

    fn direction_mask(&self) -> DirectionMask {
        DirectionMask::Both
    }

    fn apply(&self, _: FilterDirection, _: &str, message: &Value) -> FilterResult {
        let (next, changed) = map_strings(message, &|s| self.redact(s));
        if changed {
            FilterResult::Transform(next)
        } else {
            FilterResult::Pass
        }
    }

    fn metrics(&self) -> Value {
        serde_json::json!({
            "redactions": {
                "email": self.emails.load(Ordering::Relaxed),
                "phone": self.phones.load(Ordering::Relaxed),
                "ssn": self.ssns.load(Ordering::Relaxed),
                "credit_card": self.credit_cards.load(Ordering::Relaxed),
            }
        })
    }
}

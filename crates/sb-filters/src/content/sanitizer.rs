//! HTML sanitizer: strips dangerous markup from inbound string fields
//!
//! Only strings that look like HTML are touched. Script and iframe blocks
//! are removed with their content, event-handler attributes and
//! `javascript:` URLs are stripped, tracking-pixel sized images are dropped,
//! and whitespace is normalized.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use super::ContentState;
use crate::builtin::map_strings;
use crate::{DirectionMask, FilterDirection, FilterResult, MessageFilter};

pub struct HtmlSanitizer {
    state: Arc<ContentState>,
    sanitizations: AtomicU64,

    looks_like_html: Regex,
    script_block: Regex,
    iframe_block: Regex,
    event_attr: Regex,
    js_url_attr: Regex,
    tracking_pixel: Regex,
    whitespace: Regex,
}

impl HtmlSanitizer {
    pub fn new(state: Arc<ContentState>) -> Self {
        Self {
            state,
            sanitizations: AtomicU64::new(0),
            looks_like_html: Regex::new(
                r"(?i)<\s*(script|iframe|img|a|div|p|span|html|body|table|h[1-6])\b",
            )
            .expect("static pattern"),
            script_block: Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>|<script\b[^>]*/?>")
                .expect("static pattern"),
            iframe_block: Regex::new(r"(?is)<iframe\b[^>]*>.*?</iframe\s*>|<iframe\b[^>]*/?>")
                .expect("static pattern"),
            event_attr: Regex::new(r#"(?i)\son\w+\s*=\s*("[^"]*"|'[^']*'|[^\s>]+)"#)
                .expect("static pattern"),
            js_url_attr: Regex::new(r#"(?i)\s(href|src)\s*=\s*(["']?)\s*javascript:[^"'\s>]*"#)
                .expect("static pattern"),
            tracking_pixel: Regex::new(
                r#"(?is)<img\b[^>]*\b(?:width|height)\s*=\s*["']?[01]\b[^>]*>"#,
            )
            .expect("static pattern"),
            whitespace: Regex::new(r"\s+").expect("static pattern"),
        }
    }

    fn sanitize(&self, s: &str) -> Option<String> {
        if !self.looks_like_html.is_match(s) {
            return None;
        }
        let snapshot = self.state.load();

        let mut out = s.to_string();
        if snapshot.config.remove_scripts {
            out = self.script_block.replace_all(&out, "").into_owned();
            out = self.iframe_block.replace_all(&out, "").into_owned();
            out = self.event_attr.replace_all(&out, "").into_owned();
            out = self.js_url_attr.replace_all(&out, " $1=$2").into_owned();
        }
        if snapshot.config.remove_trackers {
            out = self.tracking_pixel.replace_all(&out, "").into_owned();
        }
        out = self
            .whitespace
            .replace_all(&out, " ")
            .trim()
            .to_string();

        if out == s {
            None
        } else {
            Some(out)
        }
    }
}

impl MessageFilter for HtmlSanitizer {
    fn name(&self) -> &'static str {
        "html_sanitizer"
    }

    fn description(&self) -> &'static str {
        "Strips scripts, iframes, event handlers, and tracking pixels from HTML"
    }

    fn direction_mask(&self) -> DirectionMask {
        DirectionMask::Inbound
    }

    fn apply(&self, _: FilterDirection, _: &str, message: &Value) -> FilterResult {
        let (next, changed) = map_strings(message, &|s| self.sanitize(s));
        if changed {
            self.sanitizations.fetch_add(1, Ordering::Relaxed);
            FilterResult::Transform(next)
        } else {
            FilterResult::Pass
        }
    }

    fn metrics(&self) -> Value {
        serde_json::json!({ "sanitizations": self.sanitizations.load(Ordering::Relaxed) })
    }
}

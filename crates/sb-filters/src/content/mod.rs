//! Content-filter middleware
//!
//! Optional layer over the filter chain: domain/keyword/pattern blacklist,
//! HTML sanitization, PII redaction, and response size management. All four
//! filters read a shared compiled config snapshot that is replaced
//! atomically on reload; in-flight calls finish under the old snapshot.

mod blacklist;
mod pii;
mod sanitizer;
mod size;

pub use blacklist::BlacklistFilter;
pub use pii::PiiRedactor;
pub use sanitizer::HtmlSanitizer;
pub use size::SizeManager;

use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use sb_types::{AppError, AppResult};

fn default_true() -> bool {
    true
}
fn default_max_response_length() -> usize {
    15_000
}
fn default_summarize_threshold() -> usize {
    5_000
}
fn default_hard_truncate() -> usize {
    25_000
}
fn default_base64_skip_threshold() -> usize {
    120
}

/// Operator-facing content filtering configuration (see the filter-config
/// file format)
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ContentFilterConfig {
    #[serde(default)]
    pub blocked_domains: Vec<String>,
    #[serde(default)]
    pub blocked_keywords: Vec<String>,
    #[serde(default)]
    pub blocked_patterns: Vec<String>,

    #[serde(default = "default_true")]
    pub redact_emails: bool,
    #[serde(default = "default_true")]
    pub redact_phones: bool,
    #[serde(default = "default_true")]
    pub redact_ssns: bool,
    #[serde(default = "default_true")]
    pub redact_credit_cards: bool,

    #[serde(default = "default_true")]
    pub remove_scripts: bool,
    #[serde(default = "default_true")]
    pub remove_trackers: bool,

    #[serde(default = "default_max_response_length")]
    pub max_response_length: usize,
    #[serde(default = "default_summarize_threshold")]
    pub summarize_threshold: usize,
    #[serde(default = "default_hard_truncate")]
    pub hard_truncate: usize,

    /// Base64 runs at least this long are exempt from PII redaction
    #[serde(default = "default_base64_skip_threshold")]
    pub base64_skip_threshold: usize,
}

impl Default for ContentFilterConfig {
    fn default() -> Self {
        Self {
            blocked_domains: Vec::new(),
            blocked_keywords: Vec::new(),
            blocked_patterns: Vec::new(),
            redact_emails: true,
            redact_phones: true,
            redact_ssns: true,
            redact_credit_cards: true,
            remove_scripts: true,
            remove_trackers: true,
            max_response_length: default_max_response_length(),
            summarize_threshold: default_summarize_threshold(),
            hard_truncate: default_hard_truncate(),
            base64_skip_threshold: default_base64_skip_threshold(),
        }
    }
}

/// Config with every regex compiled up front
///
/// Operator-supplied `blocked_patterns` must all compile; a bad pattern
/// rejects the whole config so the previous snapshot stays live.
pub struct CompiledContent {
    pub config: ContentFilterConfig,
    pub blocked_patterns: Vec<(String, Regex)>,
    /// Base64 runs matching this are exempt from PII redaction
    pub base64_run: Regex,
}

impl CompiledContent {
    pub fn compile(config: ContentFilterConfig) -> AppResult<Self> {
        if config.summarize_threshold == 0 || config.hard_truncate == 0 {
            return Err(AppError::InvalidParams(
                "summarize_threshold and hard_truncate must be positive".to_string(),
            ));
        }
        if config.hard_truncate < config.summarize_threshold {
            return Err(AppError::InvalidParams(
                "hard_truncate must be >= summarize_threshold".to_string(),
            ));
        }

        let mut blocked_patterns = Vec::with_capacity(config.blocked_patterns.len());
        for raw in &config.blocked_patterns {
            let re = Regex::new(raw).map_err(|e| {
                AppError::InvalidParams(format!("invalid blocked pattern '{}': {}", raw, e))
            })?;
            blocked_patterns.push((raw.clone(), re));
        }

        let base64_run = Regex::new(&format!(
            r"[A-Za-z0-9+/]{{{},}}={{0,2}}",
            config.base64_skip_threshold.max(8)
        ))
        .map_err(|e| AppError::Internal(format!("base64 pattern: {}", e)))?;

        Ok(Self {
            config,
            blocked_patterns,
            base64_run,
        })
    }
}

/// Copy-on-write snapshot holder shared by the content filters
///
/// Readers clone the inner `Arc` and never block reloads; `replace` swaps
/// the pointer only after the new config compiled cleanly.
pub struct ContentState {
    inner: RwLock<Arc<CompiledContent>>,
}

impl ContentState {
    pub fn new(config: ContentFilterConfig) -> AppResult<Arc<Self>> {
        let compiled = CompiledContent::compile(config)?;
        Ok(Arc::new(Self {
            inner: RwLock::new(Arc::new(compiled)),
        }))
    }

    pub fn load(&self) -> Arc<CompiledContent> {
        self.inner.read().clone()
    }

    /// Validate and atomically swap in a new config
    pub fn replace(&self, config: ContentFilterConfig) -> AppResult<()> {
        let compiled = Arc::new(CompiledContent::compile(config)?);
        *self.inner.write() = compiled;
        info!("content filter configuration replaced");
        Ok(())
    }

    pub fn current_config(&self) -> ContentFilterConfig {
        self.load().config.clone()
    }
}

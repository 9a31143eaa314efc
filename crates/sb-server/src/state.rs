//! Server state shared across all handlers

use std::sync::Arc;

use axum::http::HeaderMap;

use sb_broker::Broker;
use sb_config::BridgeConfig;
use sb_filters::ContentState;
use sb_monitoring::BridgeMetrics;

/// State handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    pub metrics: Arc<BridgeMetrics>,
    pub config: Arc<BridgeConfig>,
    /// Present when content filtering is enabled; backs `/filters/config`
    pub content: Option<Arc<ContentState>>,
}

impl AppState {
    pub fn new(
        broker: Arc<Broker>,
        metrics: Arc<BridgeMetrics>,
        config: Arc<BridgeConfig>,
        content: Option<Arc<ContentState>>,
    ) -> Self {
        Self {
            broker,
            metrics,
            config,
            content,
        }
    }

    /// Base URL for endpoint events and OAuth metadata
    ///
    /// `--advertise-url` wins; otherwise the incoming Host header; a bare
    /// localhost URL only as a last resort.
    pub fn base_url(&self, headers: &HeaderMap) -> String {
        if let Some(advertised) = &self.config.advertise_url {
            return advertised.trim_end_matches('/').to_string();
        }
        if let Some(host) = headers.get("host").and_then(|h| h.to_str().ok()) {
            return format!("http://{}", host);
        }
        format!("http://localhost:{}", self.config.port)
    }
}

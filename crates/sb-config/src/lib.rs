//! Bridge configuration
//!
//! Holds the resolved runtime settings (flags + environment), loads the
//! tools-catalog and filter-config files, and watches the filter-config
//! file for hot reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use sb_filters::ContentFilterConfig;
use sb_protocol::{McpPrompt, McpResource, McpTool};
use sb_types::{AppError, AppResult};

/// Authentication mode for the HTTP surface (`BRIDGE_AUTH_MODE`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    None,
    Bearer,
    ApiKey,
}

impl AuthMode {
    pub fn parse(s: &str) -> AppResult<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(AuthMode::None),
            "bearer" => Ok(AuthMode::Bearer),
            "apikey" => Ok(AuthMode::ApiKey),
            other => Err(AppError::Config(format!("unknown auth mode: {}", other))),
        }
    }
}

/// How the bridge treats a client `initialize` request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitializeMode {
    /// Bridge answers immediately and forwards fire-and-forget (default)
    Both,
    /// Bridge answers; the child never sees the initialize
    Bridge,
    /// Proxy straight through to the child
    Child,
}

/// Where server-initiated requests (method + id off the child) go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerRequestRouting {
    Broadcast,
    Drop,
}

/// Fully resolved bridge settings
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    pub command: String,
    pub cwd: Option<PathBuf>,

    pub auth_mode: AuthMode,
    pub auth_secret: String,

    /// Base URL advertised in the SSE endpoint event and OAuth metadata;
    /// when unset the request's Host header is used
    pub advertise_url: Option<String>,

    pub session_timeout: Duration,
    pub detach_grace: Duration,
    pub request_deadline: Duration,
    pub heartbeat_interval: Duration,

    pub max_queue_depth: usize,
    pub hard_cap: usize,
    pub max_message_bytes: usize,
    pub max_in_flight: usize,

    pub initialize_mode: InitializeMode,
    pub server_request_routing: ServerRequestRouting,

    pub tools_config: Option<PathBuf>,
    pub filter_config: Option<PathBuf>,
    pub extra_secret_patterns: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            command: String::new(),
            cwd: None,
            auth_mode: AuthMode::None,
            auth_secret: String::new(),
            advertise_url: None,
            session_timeout: Duration::from_secs(300),
            detach_grace: Duration::from_secs(15),
            request_deadline: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(15),
            max_queue_depth: 1024,
            hard_cap: 2048,
            max_message_bytes: 4 * 1024 * 1024,
            max_in_flight: 128,
            initialize_mode: InitializeMode::Both,
            server_request_routing: ServerRequestRouting::Broadcast,
            tools_config: None,
            filter_config: None,
            extra_secret_patterns: Vec::new(),
        }
    }
}

impl BridgeConfig {
    /// Apply `BRIDGE_*` environment overrides
    pub fn apply_env(&mut self) -> AppResult<()> {
        if let Ok(mode) = std::env::var("BRIDGE_AUTH_MODE") {
            self.auth_mode = AuthMode::parse(&mode)?;
        }
        if let Ok(secret) = std::env::var("BRIDGE_AUTH_SECRET") {
            self.auth_secret = secret;
        }
        if let Ok(raw) = std::env::var("BRIDGE_MAX_IN_FLIGHT") {
            self.max_in_flight = raw
                .parse()
                .map_err(|_| AppError::Config(format!("bad BRIDGE_MAX_IN_FLIGHT: {}", raw)))?;
        }
        if self.auth_mode != AuthMode::None && self.auth_secret.is_empty() {
            return Err(AppError::Config(
                "BRIDGE_AUTH_SECRET is required when auth is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

/// Shape of the `--tools_config` file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfigFile {
    #[serde(default)]
    pub tools: Vec<McpTool>,
    #[serde(default)]
    pub resources: Vec<McpResource>,
    #[serde(default)]
    pub prompts: Vec<McpPrompt>,
}

pub fn load_tools_config(path: &Path) -> AppResult<ToolsConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    let parsed: ToolsConfigFile = serde_json::from_str(&raw)
        .map_err(|e| AppError::Config(format!("bad tools config {}: {}", path.display(), e)))?;
    info!(
        "loaded tools config from {} ({} tools, {} resources, {} prompts)",
        path.display(),
        parsed.tools.len(),
        parsed.resources.len(),
        parsed.prompts.len()
    );
    Ok(parsed)
}

pub fn load_filter_config(path: &Path) -> AppResult<ContentFilterConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    serde_json::from_str(&raw)
        .map_err(|e| AppError::Config(format!("bad filter config {}: {}", path.display(), e)))
}

/// Callback invoked with each successfully parsed filter-config reload
pub type FilterReloadCallback = Arc<dyn Fn(ContentFilterConfig) + Send + Sync>;

/// Watch the filter-config file and invoke the callback on modification
///
/// The returned watcher must be kept alive for watching to continue.
/// Parse failures leave the running config untouched.
pub fn watch_filter_config(
    path: PathBuf,
    callback: FilterReloadCallback,
) -> AppResult<RecommendedWatcher> {
    let watched = path.clone();
    let mut watcher = notify::recommended_watcher(move |result: Result<Event, notify::Error>| {
        match result {
            Ok(event) => {
                if matches!(event.kind, EventKind::Modify(_)) {
                    info!("filter config file changed, reloading");
                    match load_filter_config(&watched) {
                        Ok(config) => callback(config),
                        Err(e) => error!("filter config reload failed: {}", e),
                    }
                }
            }
            Err(e) => error!("filter config watch error: {}", e),
        }
    })
    .map_err(|e| AppError::Config(format!("failed to create file watcher: {}", e)))?;

    watcher
        .watch(&path, RecursiveMode::NonRecursive)
        .map_err(|e| AppError::Config(format!("failed to watch {}: {}", path.display(), e)))?;

    info!("watching filter config file: {}", path.display());
    Ok(watcher)
}

//! CLI argument parsing for the bridge

use std::path::PathBuf;

use clap::Parser;

/// Expose a stdio JSON-RPC (MCP) server over SSE, WebSocket, and HTTP POST
#[derive(Parser, Debug)]
#[command(name = "bridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Command line that starts the stdio server, e.g. "serena --stdio"
    #[arg(long)]
    pub cmd: String,

    /// Port to listen on
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Working directory for the child process
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Log level
    #[arg(long = "log_level", default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARN", "ERROR"])]
    pub log_level: String,

    /// Directory for log files (stderr only when unset)
    #[arg(long = "log_location")]
    pub log_location: Option<PathBuf>,

    /// Log line format
    #[arg(long = "log_pattern", default_value = "text", value_parser = ["text", "json"])]
    pub log_pattern: String,

    /// JSON file with tool definitions for bridge-level discovery
    #[arg(long = "tools_config")]
    pub tools_config: Option<PathBuf>,

    /// JSON file enabling and configuring the content filters
    #[arg(long = "filter_config")]
    pub filter_config: Option<PathBuf>,

    /// Seconds before an idle session is destroyed
    #[arg(long = "session_timeout", default_value_t = 300)]
    pub session_timeout: u64,

    /// Seconds a detached session may wait for a sink to re-attach
    #[arg(long = "detach_grace", default_value_t = 15)]
    pub detach_grace: u64,

    /// Seconds before an unanswered request times out
    #[arg(long = "request_deadline", default_value_t = 60)]
    pub request_deadline: u64,

    /// Seconds between SSE heartbeats / WS pings
    #[arg(long = "heartbeat_interval", default_value_t = 15)]
    pub heartbeat_interval: u64,

    /// Per-session queue depth before oldest messages are dropped
    #[arg(long = "max_queue_depth", default_value_t = 1024)]
    pub max_queue_depth: u64,

    /// Sustained queue pressure at which a session is closed
    #[arg(long = "hard_cap", default_value_t = 2048)]
    pub hard_cap: u64,

    /// Largest accepted message body in bytes
    #[arg(long = "max_message_bytes", default_value_t = 4 * 1024 * 1024)]
    pub max_message_bytes: u64,

    /// Base URL to advertise in endpoint events and OAuth metadata
    /// (required behind a reverse proxy)
    #[arg(long = "advertise-url")]
    pub advertise_url: Option<String>,

    /// How client initialize requests are answered
    #[arg(long = "initialize-mode", default_value = "both", value_parser = ["both", "bridge", "child"])]
    pub initialize_mode: String,

    /// Routing for server-initiated requests
    #[arg(long = "server-request-routing", default_value = "broadcast", value_parser = ["broadcast", "drop"])]
    pub server_request_routing: String,
}

impl Cli {
    pub fn try_parse_args() -> Result<Self, clap::Error> {
        Self::try_parse()
    }
}

//! The `bridge` binary
//!
//! Wires the configuration, filter chain, child supervisor, broker, and
//! HTTP server together, then serves until interrupted.
//!
//! Exit codes: 0 normal shutdown, 1 bad flags or config, 2 child failed to
//! start, 3 restart budget exhausted.

mod cli;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use sb_broker::{Broker, BrokerOptions, Catalog, RequestRegistry, SessionStore};
use sb_config::{
    load_filter_config, load_tools_config, watch_filter_config, BridgeConfig, InitializeMode,
    ServerRequestRouting,
};
use sb_filters::{
    AddBridgeMeta, BlacklistFilter, ContentState, FilterChain, HtmlSanitizer, PiiRedactor,
    RedactSecrets, SizeManager,
};
use sb_monitoring::BridgeMetrics;
use sb_server::{build_router, AppState};
use sb_upstream::{ChildConfig, ChildState, ChildSupervisor};

fn main() -> ExitCode {
    let args = match cli::Cli::try_parse_args() {
        Ok(args) => args,
        Err(e) => {
            let code: u8 = match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {}", e);
            return ExitCode::from(1);
        }
    };
    runtime.block_on(run(args))
}

async fn run(args: cli::Cli) -> ExitCode {
    if let Err(e) = init_logging(&args) {
        eprintln!("failed to initialize logging: {}", e);
        return ExitCode::from(1);
    }

    let mut config = BridgeConfig {
        host: args.host.clone(),
        port: args.port,
        command: args.cmd.clone(),
        cwd: args.cwd.clone(),
        advertise_url: args.advertise_url.clone(),
        session_timeout: Duration::from_secs(args.session_timeout),
        detach_grace: Duration::from_secs(args.detach_grace),
        request_deadline: Duration::from_secs(args.request_deadline),
        heartbeat_interval: Duration::from_secs(args.heartbeat_interval),
        max_queue_depth: args.max_queue_depth as usize,
        hard_cap: args.hard_cap as usize,
        max_message_bytes: args.max_message_bytes as usize,
        initialize_mode: match args.initialize_mode.as_str() {
            "bridge" => InitializeMode::Bridge,
            "child" => InitializeMode::Child,
            _ => InitializeMode::Both,
        },
        server_request_routing: match args.server_request_routing.as_str() {
            "drop" => ServerRequestRouting::Drop,
            _ => ServerRequestRouting::Broadcast,
        },
        tools_config: args.tools_config.clone(),
        filter_config: args.filter_config.clone(),
        ..Default::default()
    };
    if let Err(e) = config.apply_env() {
        error!("{}", e);
        return ExitCode::from(1);
    }

    // Discovery catalog
    let catalog = match &config.tools_config {
        Some(path) => match load_tools_config(path) {
            Ok(file) => Catalog::from_file(file),
            Err(e) => {
                error!("{}", e);
                return ExitCode::from(1);
            }
        },
        None => Catalog::new(),
    };

    // Filter chain: built-ins first, then the content filters when enabled
    let mut chain = FilterChain::new();
    chain.register(Arc::new(RedactSecrets::with_extra_patterns(&config.extra_secret_patterns)), true);
    let node_id = uuid::Uuid::new_v4().simple().to_string();
    chain.register(Arc::new(AddBridgeMeta::new(node_id)), false);

    let mut content: Option<Arc<ContentState>> = None;
    if let Some(path) = &config.filter_config {
        let filter_config = match load_filter_config(path) {
            Ok(c) => c,
            Err(e) => {
                error!("{}", e);
                return ExitCode::from(1);
            }
        };
        let state = match ContentState::new(filter_config) {
            Ok(s) => s,
            Err(e) => {
                error!("invalid filter config: {}", e);
                return ExitCode::from(1);
            }
        };
        chain.register(Arc::new(BlacklistFilter::new(state.clone())), true);
        chain.register(Arc::new(HtmlSanitizer::new(state.clone())), true);
        chain.register(Arc::new(PiiRedactor::new(state.clone())), true);
        chain.register(Arc::new(SizeManager::new(state.clone())), true);
        content = Some(state);
    }

    // Keep the filter-config watcher alive for the process lifetime
    let _watcher = match (&config.filter_config, &content) {
        (Some(path), Some(state)) => {
            let state = state.clone();
            match watch_filter_config(
                path.clone(),
                Arc::new(move |new_config| {
                    if let Err(e) = state.replace(new_config) {
                        error!("rejected filter config from file: {}", e);
                    }
                }),
            ) {
                Ok(w) => Some(w),
                Err(e) => {
                    error!("{}", e);
                    None
                }
            }
        }
        _ => None,
    };

    // Child supervisor
    let child_config = ChildConfig {
        command: config.command.clone(),
        cwd: config.cwd.clone(),
        max_frame_bytes: config.max_message_bytes,
        ..Default::default()
    };
    let (upstream, events) = ChildSupervisor::spawn(child_config);

    // Give an immediately failing spawn a moment to surface
    tokio::time::sleep(Duration::from_millis(300)).await;
    if upstream.state() == ChildState::Terminal {
        error!("child failed to start: {}", config.command);
        return ExitCode::from(2);
    }

    // Broker
    let metrics = Arc::new(BridgeMetrics::new());
    let store = Arc::new(SessionStore::new(
        metrics.clone(),
        config.max_queue_depth,
        config.hard_cap,
        config.session_timeout,
        config.detach_grace,
    ));
    let broker = Arc::new(Broker::new(
        store,
        Arc::new(RequestRegistry::new()),
        Arc::new(chain),
        Arc::new(catalog),
        metrics.clone(),
        upstream.clone(),
        BrokerOptions {
            request_deadline: config.request_deadline,
            initialize_mode: config.initialize_mode,
            server_request_routing: config.server_request_routing,
        },
    ));
    broker.start(events);

    // HTTP server
    let config = Arc::new(config);
    let app = build_router(AppState::new(
        broker.clone(),
        metrics,
        config.clone(),
        content,
    ));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("cannot bind {}: {}", addr, e);
            return ExitCode::from(1);
        }
    };
    info!("bridge listening on {} (child: {})", addr, config.command);

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    broker.shutdown();
    // Let the supervisor finish its grace-period stop
    tokio::time::sleep(Duration::from_millis(500)).await;

    if let Err(e) = serve_result {
        error!("server error: {}", e);
        return ExitCode::from(1);
    }
    if upstream.state() == ChildState::Terminal {
        return ExitCode::from(3);
    }
    info!("bridge stopped");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

/// Logging to stderr, plus an optional file layer under --log_location
///
/// Stdout stays clean in every mode; the `RUST_LOG` environment variable
/// overrides `--log_level` when set.
fn init_logging(args: &cli::Cli) -> Result<(), String> {
    use tracing_subscriber::Registry;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.log_level.to_lowercase()));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    layers.push(filter.boxed());

    if args.log_pattern == "json" {
        layers.push(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .boxed(),
        );
    } else {
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .boxed(),
        );
    }

    if let Some(dir) = &args.log_location {
        std::fs::create_dir_all(dir).map_err(|e| e.to_string())?;
        let filename = format!("bridge_{}.log", chrono::Utc::now().format("%Y%m%d_%H%M%S"));
        let file = std::fs::File::create(dir.join(&filename)).map_err(|e| e.to_string())?;
        let writer = std::sync::Mutex::new(file);
        if args.log_pattern == "json" {
            layers.push(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .boxed(),
            );
        } else {
            layers.push(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer)
                    .boxed(),
            );
        }
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| e.to_string())
}

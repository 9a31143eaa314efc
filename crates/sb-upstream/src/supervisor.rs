//! Child process supervision
//!
//! Spawns the configured stdio server, pumps its stdout through the framing
//! codec, drains stderr to the log, and restarts the child with exponential
//! backoff when it dies. All writes to the child's stdin go through a single
//! writer loop, so stdin byte order equals submission order.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::framing::{write_message, FrameReader, DEFAULT_MAX_FRAME_BYTES};
use sb_types::{AppError, AppResult};

/// How long the child must run clean before Degraded clears back to Ready
const DEGRADED_RECOVERY: Duration = Duration::from_secs(30);

/// Child health state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChildState {
    Starting,
    Ready,
    Degraded,
    Dead,
    /// Restart budget exhausted; the bridge keeps serving discovery but
    /// answers every forward with an upstream-unavailable error
    Terminal,
}

/// Configuration for the supervised child
#[derive(Debug, Clone)]
pub struct ChildConfig {
    /// Shell command line, e.g. `"serena --stdio"`
    pub command: String,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub max_frame_bytes: usize,
    pub health_check_timeout: Duration,
    pub restart_backoff_cap: Duration,
    pub max_restarts_per_window: u32,
    pub restart_window: Duration,
    pub stop_grace: Duration,
}

impl Default for ChildConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            cwd: None,
            env: Vec::new(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            health_check_timeout: Duration::from_secs(10),
            restart_backoff_cap: Duration::from_secs(30),
            max_restarts_per_window: 5,
            restart_window: Duration::from_secs(120),
            stop_grace: Duration::from_secs(10),
        }
    }
}

/// Events the supervisor reports to the broker
#[derive(Debug)]
pub enum UpstreamEvent {
    /// One parsed frame off the child's stdout
    Message(Value),
    /// A framing violation (the child may survive it)
    FrameError(String),
    /// The child process exited
    Exited { code: Option<i32> },
    /// The child could not be spawned at all
    SpawnFailed(String),
}

/// Cloneable handle to the running supervisor
#[derive(Clone)]
pub struct UpstreamHandle {
    outbound_tx: mpsc::Sender<Value>,
    state: Arc<RwLock<ChildState>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl UpstreamHandle {
    pub fn state(&self) -> ChildState {
        *self.state.read()
    }

    /// Whether forwards should be attempted at all
    pub fn is_available(&self) -> bool {
        matches!(
            self.state(),
            ChildState::Starting | ChildState::Ready | ChildState::Degraded
        )
    }

    /// Submit a message for the child's stdin
    ///
    /// Messages are written in submission order by the single writer loop.
    pub async fn send(&self, message: Value) -> AppResult<()> {
        self.outbound_tx
            .send(message)
            .await
            .map_err(|_| AppError::Upstream("supervisor is gone".to_string()))
    }

    /// Advisory degradation, e.g. after an unresolvable response
    pub fn mark_degraded(&self) {
        let mut state = self.state.write();
        if *state == ChildState::Ready {
            *state = ChildState::Degraded;
        }
    }

    /// Ask the supervisor to stop the child and exit
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Handle wired to a bare channel instead of a child process
    ///
    /// The caller plays the child: it reads outbound messages from the
    /// returned receiver. For broker tests and the bench harness.
    pub fn loopback(initial: ChildState) -> (Self, mpsc::Receiver<Value>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        let (shutdown_tx, _) = broadcast::channel(1);
        (
            Self {
                outbound_tx,
                state: Arc::new(RwLock::new(initial)),
                shutdown_tx,
            },
            outbound_rx,
        )
    }

    /// Force the published state (loopback harness support)
    pub fn force_state(&self, state: ChildState) {
        *self.state.write() = state;
    }
}

/// Supervisor entry point
pub struct ChildSupervisor;

impl ChildSupervisor {
    /// Spawn the supervisor task
    ///
    /// Returns a handle for submitting outbound messages and the event
    /// stream the broker consumes.
    pub fn spawn(config: ChildConfig) -> (UpstreamHandle, mpsc::Receiver<UpstreamEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        let (event_tx, event_rx) = mpsc::channel(256);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let state = Arc::new(RwLock::new(ChildState::Starting));

        let handle = UpstreamHandle {
            outbound_tx,
            state: state.clone(),
            shutdown_tx,
        };

        tokio::spawn(run_supervisor(
            config,
            state,
            outbound_rx,
            event_tx,
            shutdown_rx,
        ));

        (handle, event_rx)
    }
}

fn spawn_child(config: &ChildConfig) -> AppResult<Child> {
    #[cfg(windows)]
    let mut command = {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&config.command);
        c
    };
    #[cfg(not(windows))]
    let mut command = {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&config.command);
        c
    };

    if let Some(cwd) = &config.cwd {
        command.current_dir(cwd);
    }
    command.envs(config.env.iter().cloned());

    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    command
        .spawn()
        .map_err(|e| AppError::Upstream(format!("failed to spawn '{}': {}", config.command, e)))
}

fn spawn_stderr_drain<R>(stderr: R)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let msg = line.trim();
                    if !msg.is_empty() {
                        info!("[child stderr] {}", msg);
                    }
                }
                Err(_) => break,
            }
        }
    });
}

async fn run_supervisor(
    config: ChildConfig,
    state: Arc<RwLock<ChildState>>,
    mut outbound_rx: mpsc::Receiver<Value>,
    event_tx: mpsc::Sender<UpstreamEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut backoff = Duration::from_secs(1);
    let mut window_started = std::time::Instant::now();
    let mut window_restarts: u32 = 0;
    let mut generation: u64 = 0;
    let mut first_start = true;

    loop {
        *state.write() = ChildState::Starting;
        generation += 1;
        info!(
            "starting upstream (generation {}): {}",
            generation, config.command
        );

        let mut child = match spawn_child(&config) {
            Ok(c) => c,
            Err(e) => {
                error!("spawn failed: {}", e);
                let _ = event_tx
                    .send(UpstreamEvent::SpawnFailed(e.to_string()))
                    .await;
                if first_start {
                    *state.write() = ChildState::Terminal;
                    return;
                }
                *state.write() = ChildState::Dead;
                if exceeded_budget(&config, &mut window_started, &mut window_restarts) {
                    *state.write() = ChildState::Terminal;
                    return;
                }
                if wait_backoff(&mut shutdown_rx, backoff).await {
                    return;
                }
                backoff = (backoff * 2).min(config.restart_backoff_cap);
                continue;
            }
        };
        first_start = false;

        let (mut stdin, stdout, stderr) =
            match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
                (Some(i), Some(o), Some(e)) => (i, o, e),
                _ => {
                    error!("child spawned without piped stdio");
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    *state.write() = ChildState::Terminal;
                    return;
                }
            };

        spawn_stderr_drain(stderr);

        // Reader task feeds parsed frames (and framing errors) to this loop
        let (frame_tx, mut frame_rx) = mpsc::channel::<AppResult<Value>>(64);
        let max_frame_bytes = config.max_frame_bytes;
        let reader_task = tokio::spawn(async move {
            let mut reader = FrameReader::new(stdout, max_frame_bytes);
            loop {
                match reader.read_message().await {
                    Ok(Some(value)) => {
                        if frame_tx.send(Ok(value)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        // After FrameTooLarge the stream position is lost;
                        // the supervisor restarts the child either way
                        let fatal = matches!(e, AppError::FrameTooLarge { .. });
                        if frame_tx.send(Err(e)).await.is_err() || fatal {
                            break;
                        }
                    }
                }
            }
        });

        // Startup health probe: the child must answer initialize in time
        let health_id = format!("bridge-health-{}", generation);
        let init = json!({
            "jsonrpc": "2.0",
            "id": health_id,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "stdio-bridge", "version": env!("CARGO_PKG_VERSION")}
            }
        });
        let mut health_ok = false;
        if let Err(e) = write_message(&mut stdin, &init).await {
            warn!("health probe write failed: {}", e);
        }
        let health_deadline = Instant::now() + config.health_check_timeout;

        let mut last_frame_error: Option<std::time::Instant> = None;
        let mut reader_done = false;

        enum GenerationExit {
            /// Supervisor asked to stop for good
            Shutdown,
            /// Child already exited on its own
            ChildExited,
            /// Something broke; kill and respawn
            Restart,
        }

        // Inner loop runs one child generation
        let exit = loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("supervisor shutting down, stopping child");
                    break GenerationExit::Shutdown;
                }

                _ = tokio::time::sleep_until(health_deadline), if !health_ok => {
                    warn!("upstream failed health check within {:?}", config.health_check_timeout);
                    break GenerationExit::Restart;
                }

                maybe = outbound_rx.recv() => {
                    match maybe {
                        Some(message) => {
                            if let Err(e) = write_message(&mut stdin, &message).await {
                                error!("stdin write failed: {}", e);
                                break GenerationExit::Restart;
                            }
                        }
                        // Every handle dropped: nothing left to serve
                        None => break GenerationExit::Shutdown,
                    }
                }

                frame = frame_rx.recv(), if !reader_done => {
                    match frame {
                        Some(Ok(value)) => {
                            if !health_ok
                                && value.get("id").and_then(Value::as_str) == Some(health_id.as_str())
                            {
                                health_ok = true;
                                backoff = Duration::from_secs(1);
                                *state.write() = ChildState::Ready;
                                info!("upstream health check passed");
                                continue;
                            }
                            if let Some(t) = last_frame_error {
                                if t.elapsed() >= DEGRADED_RECOVERY {
                                    let mut s = state.write();
                                    if *s == ChildState::Degraded {
                                        *s = ChildState::Ready;
                                        debug!("upstream recovered from degraded state");
                                    }
                                    drop(s);
                                    last_frame_error = None;
                                }
                            }
                            let _ = event_tx.send(UpstreamEvent::Message(value)).await;
                        }
                        Some(Err(e)) => {
                            let fatal = matches!(e, AppError::FrameTooLarge { .. });
                            let repeat = last_frame_error
                                .map(|t| t.elapsed() < DEGRADED_RECOVERY)
                                .unwrap_or(false);
                            warn!("framing error on child stdout: {}", e);
                            let _ = event_tx.send(UpstreamEvent::FrameError(e.to_string())).await;
                            if fatal || repeat {
                                break GenerationExit::Restart;
                            }
                            *state.write() = ChildState::Degraded;
                            last_frame_error = Some(std::time::Instant::now());
                        }
                        None => {
                            reader_done = true;
                        }
                    }
                }

                status = child.wait() => {
                    let code = status.ok().and_then(|s| s.code());
                    warn!("upstream exited with code {:?}", code);
                    let _ = event_tx.send(UpstreamEvent::Exited { code }).await;
                    break GenerationExit::ChildExited;
                }
            }
        };

        reader_task.abort();
        match exit {
            GenerationExit::Shutdown => {
                graceful_stop(child, stdin, config.stop_grace).await;
                *state.write() = ChildState::Dead;
                return;
            }
            GenerationExit::ChildExited => {}
            GenerationExit::Restart => {
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
        drop(stdin);
        *state.write() = ChildState::Dead;

        if exceeded_budget(&config, &mut window_started, &mut window_restarts) {
            error!(
                "restart budget exhausted ({} in {:?}); entering terminal state",
                window_restarts, config.restart_window
            );
            *state.write() = ChildState::Terminal;
            return;
        }

        info!("respawning upstream in {:?}", backoff);
        if wait_backoff(&mut shutdown_rx, backoff).await {
            return;
        }
        backoff = (backoff * 2).min(config.restart_backoff_cap);
    }
}

/// Returns true when the restart budget for the current window is spent
fn exceeded_budget(
    config: &ChildConfig,
    window_started: &mut std::time::Instant,
    window_restarts: &mut u32,
) -> bool {
    if window_started.elapsed() > config.restart_window {
        *window_started = std::time::Instant::now();
        *window_restarts = 0;
    }
    *window_restarts += 1;
    *window_restarts > config.max_restarts_per_window
}

/// Returns true if shutdown was requested during the backoff sleep
async fn wait_backoff(shutdown_rx: &mut broadcast::Receiver<()>, backoff: Duration) -> bool {
    tokio::select! {
        _ = shutdown_rx.recv() => true,
        _ = tokio::time::sleep(backoff) => false,
    }
}

/// Close stdin, wait for the grace period, then kill
async fn graceful_stop(mut child: Child, stdin: tokio::process::ChildStdin, grace: Duration) {
    drop(stdin);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            info!("child exited cleanly with {:?}", status.code());
        }
        Ok(Err(e)) => {
            warn!("error waiting for child: {}", e);
        }
        Err(_) => {
            warn!("child did not exit within {:?}, killing", grace);
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

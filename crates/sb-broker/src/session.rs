//! Session store
//!
//! One `Session` per logical client, each owning bounded drop-oldest queues
//! and zero or more attached transport sinks (SSE or WS writers). Responses
//! are delivered to the most recently attached sink; notifications fan out
//! one copy per sink. A detached session buffers into its own queue, which
//! is flushed into the next sink to attach.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

use sb_monitoring::BridgeMetrics;

/// Close reason used when a consumer cannot keep up
pub const REASON_SLOW_CONSUMER: &str = "slow_consumer";

/// What lands in a sink's queue
#[derive(Debug, Clone)]
pub enum SinkMessage {
    Payload(Value),
    /// The session is closing; the sink should emit its end event and stop
    End { reason: String },
}

/// Result of pushing into a bounded queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePush {
    Queued,
    /// The queue was full; the oldest message was dropped to make room
    DroppedOldest,
    /// Sustained pressure blew past the hard cap; close the session
    HardCapExceeded,
}

/// Bounded drop-oldest FIFO with wakeup
///
/// `max_depth` bounds the live queue; `hard_cap` bounds cumulative pressure:
/// once the number of messages pushed without a drain exceeds it, the push
/// reports `HardCapExceeded` and the broker closes the session.
pub struct SessionQueue {
    inner: Mutex<VecDeque<SinkMessage>>,
    notify: Notify,
    max_depth: usize,
    hard_cap: usize,
    dropped_total: AtomicU64,
    dropped_since_pop: AtomicU64,
}

impl SessionQueue {
    pub fn new(max_depth: usize, hard_cap: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            max_depth,
            hard_cap,
            dropped_total: AtomicU64::new(0),
            dropped_since_pop: AtomicU64::new(0),
        }
    }

    pub fn push(&self, message: SinkMessage) -> QueuePush {
        let mut queue = self.inner.lock();
        queue.push_back(message);

        let mut outcome = QueuePush::Queued;
        if queue.len() > self.max_depth {
            queue.pop_front();
            self.dropped_total.fetch_add(1, Ordering::Relaxed);
            let since = self.dropped_since_pop.fetch_add(1, Ordering::Relaxed) + 1;
            outcome = if since as usize + queue.len() > self.hard_cap {
                QueuePush::HardCapExceeded
            } else {
                QueuePush::DroppedOldest
            };
        }
        drop(queue);
        self.notify.notify_one();
        outcome
    }

    pub fn pop(&self) -> Option<SinkMessage> {
        let item = self.inner.lock().pop_front();
        if item.is_some() {
            self.dropped_since_pop.store(0, Ordering::Relaxed);
        }
        item
    }

    /// Wait until the queue is (probably) non-empty
    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    fn drain(&self) -> Vec<SinkMessage> {
        self.inner.lock().drain(..).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Sse,
    WebSocket,
}

/// A live writer attached to a session
///
/// The sink holds only its own queue; the session owns the attachment slot,
/// so a disconnected sink never keeps the session alive.
pub struct Sink {
    pub id: u64,
    pub kind: SinkKind,
    pub queue: SessionQueue,
}

/// Metadata captured from the client's first contact
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub remote_addr: Option<String>,
}

pub struct Session {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub priority: String,
    pub client_info: ClientInfo,

    last_activity: Mutex<Instant>,
    /// Holds messages while no sink is attached
    buffer: SessionQueue,
    sinks: Mutex<Vec<Arc<Sink>>>,
    detached_since: Mutex<Option<Instant>>,
    next_sink_id: AtomicU64,

    closed: AtomicBool,
    close_reason: Mutex<Option<String>>,

    max_queue_depth: usize,
    hard_cap: usize,
}

impl Session {
    fn new(session_id: String, client_info: ClientInfo, max_queue_depth: usize, hard_cap: usize) -> Self {
        Self {
            session_id,
            created_at: Utc::now(),
            priority: "normal".to_string(),
            client_info,
            last_activity: Mutex::new(Instant::now()),
            buffer: SessionQueue::new(max_queue_depth, hard_cap),
            sinks: Mutex::new(Vec::new()),
            detached_since: Mutex::new(Some(Instant::now())),
            next_sink_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            close_reason: Mutex::new(None),
            max_queue_depth,
            hard_cap,
        }
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_reason(&self) -> Option<String> {
        self.close_reason.lock().clone()
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.lock().len()
    }

    /// How long every sink has been gone, if the session is detached
    pub fn detached_for(&self) -> Option<Duration> {
        self.detached_since.lock().map(|t| t.elapsed())
    }

    pub fn queued_messages(&self) -> usize {
        let sinks = self.sinks.lock();
        self.buffer.len() + sinks.iter().map(|s| s.queue.len()).sum::<usize>()
    }

    pub fn dropped_total(&self) -> u64 {
        let sinks = self.sinks.lock();
        self.buffer.dropped_total() + sinks.iter().map(|s| s.queue.dropped_total()).sum::<u64>()
    }

    /// Attach a new sink; buffered messages flush into it
    pub fn attach_sink(self: &Arc<Self>, kind: SinkKind) -> Arc<Sink> {
        let sink = Arc::new(Sink {
            id: self.next_sink_id.fetch_add(1, Ordering::SeqCst),
            kind,
            queue: SessionQueue::new(self.max_queue_depth, self.hard_cap),
        });

        for message in self.buffer.drain() {
            sink.queue.push(message);
        }

        self.sinks.lock().push(sink.clone());
        *self.detached_since.lock() = None;
        self.touch();
        debug!(
            "sink {} ({:?}) attached to session {}",
            sink.id, sink.kind, self.session_id
        );
        sink
    }

    /// Idempotent detach; the last detach starts the grace clock
    pub fn detach_sink(&self, sink_id: u64) {
        let mut sinks = self.sinks.lock();
        let before = sinks.len();
        sinks.retain(|s| s.id != sink_id);
        if sinks.len() < before {
            debug!("sink {} detached from session {}", sink_id, self.session_id);
        }
        if sinks.is_empty() {
            *self.detached_since.lock() = Some(Instant::now());
        }
    }

    /// Deliver a response: at most once across all sinks
    pub fn enqueue_response(&self, message: Value) -> QueuePush {
        if self.is_closed() {
            return QueuePush::Queued;
        }
        let sinks = self.sinks.lock();
        match sinks.last() {
            Some(sink) => sink.queue.push(SinkMessage::Payload(message)),
            None => self.buffer.push(SinkMessage::Payload(message)),
        }
    }

    /// Deliver a notification: exactly one copy per attached sink
    ///
    /// Returns the worst outcome observed across the sinks.
    pub fn enqueue_notification(&self, message: Value) -> QueuePush {
        if self.is_closed() {
            return QueuePush::Queued;
        }
        let sinks = self.sinks.lock();
        if sinks.is_empty() {
            return self.buffer.push(SinkMessage::Payload(message));
        }
        let mut worst = QueuePush::Queued;
        for sink in sinks.iter() {
            let outcome = sink.queue.push(SinkMessage::Payload(message.clone()));
            worst = match (worst, outcome) {
                (_, QueuePush::HardCapExceeded) | (QueuePush::HardCapExceeded, _) => {
                    QueuePush::HardCapExceeded
                }
                (_, QueuePush::DroppedOldest) | (QueuePush::DroppedOldest, _) => {
                    QueuePush::DroppedOldest
                }
                _ => QueuePush::Queued,
            };
        }
        worst
    }

    /// Idempotent close; every sink receives a final end marker
    pub fn close(&self, reason: &str) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        *self.close_reason.lock() = Some(reason.to_string());
        let sinks = self.sinks.lock();
        for sink in sinks.iter() {
            sink.queue.push(SinkMessage::End {
                reason: reason.to_string(),
            });
        }
        info!("session {} closed: {}", self.session_id, reason);
        true
    }
}

/// All live sessions, keyed by their opaque random token
pub struct SessionStore {
    sessions: DashMap<String, Arc<Session>>,
    metrics: Arc<BridgeMetrics>,
    max_queue_depth: usize,
    hard_cap: usize,
    session_timeout: Duration,
    detach_grace: Duration,
}

impl SessionStore {
    pub fn new(
        metrics: Arc<BridgeMetrics>,
        max_queue_depth: usize,
        hard_cap: usize,
        session_timeout: Duration,
        detach_grace: Duration,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            metrics,
            max_queue_depth,
            hard_cap,
            session_timeout,
            detach_grace,
        }
    }

    /// Create a session with a fresh 128-bit random token
    pub fn create(&self, client_info: ClientInfo) -> Arc<Session> {
        let session_id = Uuid::new_v4().simple().to_string();
        let session = Arc::new(Session::new(
            session_id.clone(),
            client_info,
            self.max_queue_depth,
            self.hard_cap,
        ));
        self.sessions.insert(session_id.clone(), session.clone());
        self.metrics
            .sessions_created
            .fetch_add(1, Ordering::Relaxed);
        info!("new session {} (total={})", session_id, self.sessions.len());
        session
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|s| s.clone()).collect()
    }

    /// Idempotent close + removal
    pub fn close(&self, session_id: &str, reason: &str) -> bool {
        match self.sessions.remove(session_id) {
            Some((_, session)) => {
                session.close(reason);
                self.metrics.sessions_closed.fetch_add(1, Ordering::Relaxed);
                if reason == REASON_SLOW_CONSUMER {
                    self.metrics
                        .sessions_closed_slow_consumer
                        .fetch_add(1, Ordering::Relaxed);
                }
                true
            }
            None => false,
        }
    }

    /// Close sessions idle past the timeout or detached past the grace
    pub fn sweep_idle(&self) -> Vec<String> {
        let mut victims = Vec::new();
        for entry in self.sessions.iter() {
            let session = entry.value();
            if session.idle_for() > self.session_timeout {
                victims.push((session.session_id.clone(), "idle_timeout"));
            } else if session
                .detached_for()
                .map(|d| d > self.detach_grace)
                .unwrap_or(false)
            {
                victims.push((session.session_id.clone(), "detached"));
            }
        }
        let mut closed = Vec::new();
        for (session_id, reason) in victims {
            if self.close(&session_id, reason) {
                closed.push(session_id);
            }
        }
        closed
    }

    /// Close every session (graceful shutdown)
    pub fn close_all(&self, reason: &str) {
        let ids: Vec<String> = self.sessions.iter().map(|s| s.session_id.clone()).collect();
        for id in ids {
            self.close(&id, reason);
        }
    }
}

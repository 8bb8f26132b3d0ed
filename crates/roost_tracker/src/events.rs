//! Fire-and-forget event publication.
//!
//! Handlers call `publish()` on the hot path; events go through a bounded
//! channel to a background drain thread that fans out to every registered
//! sink. Publication never blocks and never fails into the handler: when
//! the channel is full the event is dropped and a counter records it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use roost_common::types::{AppAttemptId, ApplicationId, NodeId, NodeState};

use crate::records::{ContainerStatus, LogAggregationReport, NodeStatus};

/// Capacity of the channel between handlers and the drain thread.
const EVENT_CHANNEL_CAPACITY: usize = 16 * 1024;

/// Lifecycle signals delivered to node state machines downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleKind {
    Rebooting,
    Decommission,
    Shutdown,
    Expire,
}

/// Everything the tracker tells the rest of the resource manager.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    NodeStarted {
        node_id: NodeId,
        container_statuses: Option<Vec<ContainerStatus>>,
        running_apps: Option<Vec<ApplicationId>>,
        node_status: NodeStatus,
        log_aggregation: Option<Vec<LogAggregationReport>>,
    },
    NodeReconnected {
        node_id: NodeId,
        http_port: u16,
        running_apps: Vec<ApplicationId>,
        container_statuses: Vec<ContainerStatus>,
    },
    NodeStatusUpdate {
        node_id: NodeId,
        status: NodeStatus,
        log_aggregation: Option<Vec<LogAggregationReport>>,
    },
    NodeLifecycle {
        node_id: NodeId,
        kind: LifecycleKind,
    },
    NodeRemoved {
        node_id: NodeId,
        state: NodeState,
    },
    ContainerFinished {
        attempt: AppAttemptId,
        status: ContainerStatus,
    },
}

/// A consumer of tracker events. Implementations must not panic; delivery
/// happens on the drain thread, outside any handler.
pub trait EventSink: Send + Sync {
    fn handle(&self, event: &TrackerEvent);
}

/// Channel-backed dispatcher. `publish()` is non-blocking; a named
/// background thread drains the channel and fans each event out to all
/// sinks in order.
pub struct EventDispatcher {
    tx: mpsc::SyncSender<TrackerEvent>,
    sinks: Arc<RwLock<Vec<Arc<dyn EventSink>>>>,
    published: AtomicU64,
    dropped: AtomicU64,
    drained: Arc<AtomicU64>,
    _drain_thread: std::thread::JoinHandle<()>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::sync_channel::<TrackerEvent>(EVENT_CHANNEL_CAPACITY);
        let sinks: Arc<RwLock<Vec<Arc<dyn EventSink>>>> = Arc::new(RwLock::new(Vec::new()));
        let sinks_for_drain = Arc::clone(&sinks);
        let drained = Arc::new(AtomicU64::new(0));
        let drained_for_drain = Arc::clone(&drained);

        let drain_thread = std::thread::Builder::new()
            .name("roost-event-drain".into())
            .spawn(move || {
                for event in rx {
                    let sinks = sinks_for_drain.read().clone();
                    for sink in &sinks {
                        sink.handle(&event);
                    }
                    drained_for_drain.fetch_add(1, Ordering::Release);
                }
            })
            .unwrap_or_else(|e| {
                tracing::error!("failed to spawn event drain thread: {}", e);
                std::thread::spawn(|| {})
            });

        Self {
            tx,
            sinks,
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            drained,
            _drain_thread: drain_thread,
        }
    }

    /// Register a sink. Events published afterwards are delivered to it.
    pub fn subscribe(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    /// Non-blocking publish. A full channel drops the event and bumps the
    /// drop counter.
    pub fn publish(&self, event: TrackerEvent) {
        self.published.fetch_add(1, Ordering::Relaxed);
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wait until the drain thread has delivered every successfully-sent
    /// event. Test helper; bounded by a two-second safety valve.
    pub fn flush(&self) {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let sent = self
                .published
                .load(Ordering::SeqCst)
                .saturating_sub(self.dropped.load(Ordering::SeqCst));
            if self.drained.load(Ordering::Acquire) >= sent {
                break;
            }
            if Instant::now() > deadline {
                break;
            }
            std::thread::yield_now();
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Sink that collects events into a vector. Used by tests and by the
/// server binary's startup self-check.
#[derive(Default)]
pub struct VecSink {
    events: Mutex<Vec<TrackerEvent>>,
}

impl VecSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<TrackerEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Count events matching a predicate.
    pub fn count_matching(&self, pred: impl Fn(&TrackerEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for VecSink {
    fn handle(&self, event: &TrackerEvent) {
        self.events.lock().push(event.clone());
    }
}

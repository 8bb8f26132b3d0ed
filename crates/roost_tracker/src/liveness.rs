//! Node liveness monitoring.
//!
//! Registered nodes must ping (heartbeat) within the expiry interval. A
//! background thread sweeps on a fixed cadence and publishes an EXPIRE
//! lifecycle event for every node that went silent. The contract to the
//! tracker is three verbs: `register`, `unregister`, `received_ping`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use roost_common::config::LivenessConfig;
use roost_common::stop::StopSignal;
use roost_common::types::NodeId;

use crate::events::{EventDispatcher, LifecycleKind, TrackerEvent};

pub struct LivenessMonitor {
    pings: Arc<Mutex<HashMap<NodeId, Instant>>>,
    expiry: Duration,
    scan_interval: Duration,
    dispatcher: Arc<EventDispatcher>,
    stop: StopSignal,
    scan_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl LivenessMonitor {
    pub fn new(config: &LivenessConfig, dispatcher: Arc<EventDispatcher>) -> Self {
        Self {
            pings: Arc::new(Mutex::new(HashMap::new())),
            expiry: Duration::from_millis(config.expiry_interval_ms),
            scan_interval: Duration::from_millis(config.scan_interval_ms),
            dispatcher,
            stop: StopSignal::new(),
            scan_thread: Mutex::new(None),
        }
    }

    /// Start tracking a node, with its ping clock reset to now.
    pub fn register(&self, node_id: NodeId) {
        self.pings.lock().insert(node_id, Instant::now());
    }

    pub fn unregister(&self, node_id: &NodeId) {
        self.pings.lock().remove(node_id);
    }

    /// Refresh a node's ping clock. Pings from untracked nodes are ignored.
    pub fn received_ping(&self, node_id: &NodeId) {
        if let Some(at) = self.pings.lock().get_mut(node_id) {
            *at = Instant::now();
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.pings.lock().len()
    }

    /// Spawn the background expiry scan. Idempotent.
    pub fn start(&self) {
        let mut slot = self.scan_thread.lock();
        if slot.is_some() {
            return;
        }
        let pings = Arc::clone(&self.pings);
        let dispatcher = Arc::clone(&self.dispatcher);
        let expiry = self.expiry;
        let scan_interval = self.scan_interval;
        let stop = self.stop.clone();

        let handle = std::thread::Builder::new()
            .name("roost-liveness-scan".into())
            .spawn(move || {
                while !stop.sleep(scan_interval) {
                    for node_id in Self::sweep(&pings, expiry) {
                        tracing::warn!(node = %node_id, "node missed its liveness deadline, expiring");
                        dispatcher.publish(TrackerEvent::NodeLifecycle {
                            node_id,
                            kind: LifecycleKind::Expire,
                        });
                    }
                }
            })
            .unwrap_or_else(|e| {
                tracing::error!("failed to spawn liveness scan thread: {}", e);
                std::thread::spawn(|| {})
            });
        *slot = Some(handle);
    }

    /// Signal the scan thread and join it.
    pub fn stop(&self) {
        self.stop.stop();
        if let Some(handle) = self.scan_thread.lock().take() {
            let _ = handle.join();
        }
    }

    /// Remove and return every node past its deadline.
    fn sweep(pings: &Mutex<HashMap<NodeId, Instant>>, expiry: Duration) -> Vec<NodeId> {
        let now = Instant::now();
        let mut pings = pings.lock();
        let expired: Vec<NodeId> = pings
            .iter()
            .filter(|(_, at)| now.duration_since(**at) > expiry)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            pings.remove(id);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::VecSink;

    fn monitor(expiry_ms: u64, scan_ms: u64) -> (LivenessMonitor, Arc<EventDispatcher>, Arc<VecSink>) {
        let dispatcher = Arc::new(EventDispatcher::new());
        let sink = VecSink::new();
        dispatcher.subscribe(sink.clone());
        let config = LivenessConfig {
            expiry_interval_ms: expiry_ms,
            scan_interval_ms: scan_ms,
        };
        (
            LivenessMonitor::new(&config, Arc::clone(&dispatcher)),
            dispatcher,
            sink,
        )
    }

    #[test]
    fn test_register_and_unregister() {
        let (monitor, _, _) = monitor(1000, 10);
        let id = NodeId::new("h1", 8041);
        monitor.register(id.clone());
        assert_eq!(monitor.tracked_count(), 1);
        monitor.unregister(&id);
        assert_eq!(monitor.tracked_count(), 0);
    }

    #[test]
    fn test_ping_for_unknown_node_is_ignored() {
        let (monitor, _, _) = monitor(1000, 10);
        monitor.received_ping(&NodeId::new("ghost", 8041));
        assert_eq!(monitor.tracked_count(), 0);
    }

    #[test]
    fn test_silent_node_expires() {
        let (monitor, dispatcher, sink) = monitor(30, 5);
        monitor.register(NodeId::new("h1", 8041));
        monitor.start();

        std::thread::sleep(Duration::from_millis(120));
        monitor.stop();
        dispatcher.flush();

        assert_eq!(monitor.tracked_count(), 0, "expired node is dropped");
        let expired = sink.count_matching(|e| {
            matches!(
                e,
                TrackerEvent::NodeLifecycle {
                    kind: LifecycleKind::Expire,
                    ..
                }
            )
        });
        assert_eq!(expired, 1, "exactly one expire event per node");
    }

    #[test]
    fn test_pinging_node_survives() {
        let (monitor, dispatcher, sink) = monitor(60, 5);
        let id = NodeId::new("h1", 8041);
        monitor.register(id.clone());
        monitor.start();

        for _ in 0..10 {
            std::thread::sleep(Duration::from_millis(15));
            monitor.received_ping(&id);
        }
        monitor.stop();
        dispatcher.flush();

        assert_eq!(monitor.tracked_count(), 1);
        assert!(sink.is_empty(), "no expire events for a live node");
    }

    #[test]
    fn test_stop_is_prompt() {
        let (monitor, _, _) = monitor(10_000, 5_000);
        monitor.start();
        let start = Instant::now();
        monitor.stop();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}

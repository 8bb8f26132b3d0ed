//! Concurrent node registry: the single source of truth for membership.
//!
//! The map supports atomic put-if-absent; each record carries its own
//! short-lived lock for read-modify-write, so heartbeats for different
//! nodes never contend.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;

use roost_common::types::{ApplicationId, NodeId, NodeState, Resource};

use crate::records::HeartbeatResponse;

/// Registry entry for one node agent.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub node_id: NodeId,
    pub http_port: u16,
    pub rack: String,
    pub version: String,
    pub total_capability: Resource,
    pub physical_capability: Option<Resource>,
    /// Set when the dynamic resource table adjusted the declared capability.
    pub capability_overridden: bool,
    pub state: NodeState,
    pub running_apps: BTreeSet<ApplicationId>,
    /// Authoritative heartbeat counter; advances by exactly one per
    /// successful heartbeat, wrapping through the 31-bit mask.
    pub last_response_id: u32,
    /// Last fully-built response, kept for idempotent replay of duplicate
    /// heartbeats.
    pub last_response: HeartbeatResponse,
    pub last_ping_at: Instant,
    /// An admin resized this node; the new capability must be synced to the
    /// agent on its next heartbeat.
    pub updated_capability_pending: bool,
    /// Container updates carried by the most recent status report; the
    /// pacing controller reads this as its busy-ness signal.
    pub last_status_signal: usize,
}

impl NodeRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: NodeId,
        http_port: u16,
        rack: String,
        version: String,
        total_capability: Resource,
        physical_capability: Option<Resource>,
        capability_overridden: bool,
        running_apps: impl IntoIterator<Item = ApplicationId>,
    ) -> Self {
        Self {
            node_id,
            http_port,
            rack,
            version,
            total_capability,
            physical_capability,
            capability_overridden,
            state: NodeState::New,
            running_apps: running_apps.into_iter().collect(),
            last_response_id: 0,
            last_response: HeartbeatResponse::normal(0, 0),
            last_ping_at: Instant::now(),
            updated_capability_pending: false,
            last_status_signal: 0,
        }
    }

    /// Reset heartbeat bookkeeping after an agent restart: the next
    /// heartbeat is expected to carry response id 0 again.
    pub fn reset_last_response(&mut self) {
        self.last_response_id = 0;
        self.last_response = HeartbeatResponse::normal(0, 0);
    }

    pub fn touch_ping(&mut self) {
        self.last_ping_at = Instant::now();
    }

    /// Admin path: install a new total capability to be synced to the agent.
    pub fn set_total_capability(&mut self, capability: Resource) {
        self.total_capability = capability;
        self.updated_capability_pending = true;
    }
}

/// Concurrent mapping `NodeId -> NodeRecord`. No iteration order is
/// guaranteed.
pub struct NodeRegistry {
    nodes: DashMap<NodeId, Arc<Mutex<NodeRecord>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
        }
    }

    /// Atomic put-if-absent. Returns the already-present entry when one
    /// exists; the caller decides between replace and reconnect.
    pub fn put_if_absent(&self, record: NodeRecord) -> Option<Arc<Mutex<NodeRecord>>> {
        match self.nodes.entry(record.node_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(e) => Some(Arc::clone(e.get())),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(Arc::new(Mutex::new(record)));
                None
            }
        }
    }

    /// Unconditional overwrite (reconnect-with-replace path).
    pub fn replace(&self, record: NodeRecord) {
        self.nodes
            .insert(record.node_id.clone(), Arc::new(Mutex::new(record)));
    }

    pub fn get(&self, node_id: &NodeId) -> Option<Arc<Mutex<NodeRecord>>> {
        self.nodes.get(node_id).map(|e| Arc::clone(e.value()))
    }

    pub fn remove(&self, node_id: &NodeId) -> Option<Arc<Mutex<NodeRecord>>> {
        self.nodes.remove(node_id).map(|(_, v)| v)
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Current state of a node, if registered.
    pub fn state_of(&self, node_id: &NodeId) -> Option<NodeState> {
        self.get(node_id).map(|rec| rec.lock().state)
    }

    /// Snapshot of all node ids (unordered).
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Cluster-level node counters, adjusted on state transitions and on the
/// reconnect-with-replace path. Thread-safe; share via `Arc`.
#[derive(Debug, Default)]
pub struct ClusterMetrics {
    active_nodes: AtomicI64,
    unhealthy_nodes: AtomicI64,
    decommissioning_nodes: AtomicI64,
    decommissioned_nodes: AtomicI64,
    lost_nodes: AtomicI64,
    rebooted_nodes: AtomicI64,
    shutdown_nodes: AtomicI64,
}

/// Point-in-time view of the cluster counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterMetricsSnapshot {
    pub active_nodes: i64,
    pub unhealthy_nodes: i64,
    pub decommissioning_nodes: i64,
    pub decommissioned_nodes: i64,
    pub lost_nodes: i64,
    pub rebooted_nodes: i64,
    pub shutdown_nodes: i64,
}

impl ClusterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter_for(&self, state: NodeState) -> Option<&AtomicI64> {
        match state {
            NodeState::Running => Some(&self.active_nodes),
            NodeState::Unhealthy => Some(&self.unhealthy_nodes),
            NodeState::Decommissioning => Some(&self.decommissioning_nodes),
            NodeState::Decommissioned => Some(&self.decommissioned_nodes),
            NodeState::Lost => Some(&self.lost_nodes),
            NodeState::Rebooted => Some(&self.rebooted_nodes),
            NodeState::Shutdown => Some(&self.shutdown_nodes),
            NodeState::New => None,
        }
    }

    pub fn increment_state(&self, state: NodeState) {
        if let Some(counter) = self.counter_for(state) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn decrement_state(&self, state: NodeState) {
        match self.counter_for(state) {
            Some(counter) => {
                counter.fetch_sub(1, Ordering::Relaxed);
            }
            None => tracing::debug!(%state, "no cluster counter for state"),
        }
    }

    /// Record a state transition for one node.
    pub fn transition(&self, from: NodeState, to: NodeState) {
        self.decrement_state(from);
        self.increment_state(to);
    }

    pub fn snapshot(&self) -> ClusterMetricsSnapshot {
        ClusterMetricsSnapshot {
            active_nodes: self.active_nodes.load(Ordering::Relaxed),
            unhealthy_nodes: self.unhealthy_nodes.load(Ordering::Relaxed),
            decommissioning_nodes: self.decommissioning_nodes.load(Ordering::Relaxed),
            decommissioned_nodes: self.decommissioned_nodes.load(Ordering::Relaxed),
            lost_nodes: self.lost_nodes.load(Ordering::Relaxed),
            rebooted_nodes: self.rebooted_nodes.load(Ordering::Relaxed),
            shutdown_nodes: self.shutdown_nodes.load(Ordering::Relaxed),
        }
    }
}

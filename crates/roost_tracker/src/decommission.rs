//! Drain tracking for nodes leaving the cluster gracefully.
//!
//! A DECOMMISSIONING node keeps heartbeating while its containers finish.
//! The watcher records what each such node still runs and answers the one
//! question the heartbeat handler asks: is this node fully drained?

use std::collections::HashMap;

use parking_lot::Mutex;

use roost_common::config::{DecommissionConfig, DrainPolicy};
use roost_common::types::{NodeId, NodeState};

use crate::records::{ContainerState, NodeStatus};

#[derive(Debug, Clone)]
struct DrainProgress {
    running_containers: usize,
    running_apps: usize,
}

pub struct DecommissionWatcher {
    policy: DrainPolicy,
    tracked: Mutex<HashMap<NodeId, DrainProgress>>,
}

impl DecommissionWatcher {
    pub fn new(config: &DecommissionConfig) -> Self {
        Self {
            policy: config.drain_policy,
            tracked: Mutex::new(HashMap::new()),
        }
    }

    /// Feed one heartbeat's worth of state. Nodes not in DECOMMISSIONING
    /// are dropped from tracking.
    pub fn update(&self, node_id: &NodeId, state: NodeState, status: &NodeStatus, running_apps: usize) {
        let mut tracked = self.tracked.lock();
        if state != NodeState::Decommissioning {
            tracked.remove(node_id);
            return;
        }
        let running_containers = status
            .container_statuses
            .iter()
            .filter(|c| c.state == ContainerState::Running)
            .count();
        tracked.insert(
            node_id.clone(),
            DrainProgress {
                running_containers,
                running_apps,
            },
        );
    }

    /// Consulted only for DECOMMISSIONING nodes: true once nothing of
    /// interest remains running per the configured drain policy.
    pub fn check_ready_to_be_decommissioned(&self, node_id: &NodeId) -> bool {
        let tracked = self.tracked.lock();
        match tracked.get(node_id) {
            Some(progress) => {
                progress.running_containers == 0
                    && (self.policy == DrainPolicy::Containers || progress.running_apps == 0)
            }
            None => false,
        }
    }

    /// Forget a node (decommission completed, or the node went away).
    pub fn remove(&self, node_id: &NodeId) {
        self.tracked.lock().remove(node_id);
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{ContainerStatus, NodeHealthStatus};
    use roost_common::types::{AppAttemptId, ApplicationId, ContainerId};

    fn status(host: &str, running: usize) -> NodeStatus {
        let attempt = AppAttemptId::new(ApplicationId::new(1, 1), 1);
        NodeStatus {
            node_id: NodeId::new(host, 8041),
            response_id: 0,
            container_statuses: (0..running)
                .map(|i| ContainerStatus {
                    id: ContainerId::new(attempt, i as u64),
                    state: ContainerState::Running,
                    exit_status: -1,
                    diagnostics: String::new(),
                })
                .collect(),
            keep_alive_apps: vec![],
            health: NodeHealthStatus::healthy(0),
        }
    }

    fn watcher(policy: DrainPolicy) -> DecommissionWatcher {
        DecommissionWatcher::new(&DecommissionConfig {
            drain_policy: policy,
        })
    }

    #[test]
    fn test_untracked_node_is_not_ready() {
        let w = watcher(DrainPolicy::Containers);
        assert!(!w.check_ready_to_be_decommissioned(&NodeId::new("h1", 8041)));
    }

    #[test]
    fn test_running_containers_block_drain() {
        let w = watcher(DrainPolicy::Containers);
        let id = NodeId::new("h1", 8041);
        w.update(&id, NodeState::Decommissioning, &status("h1", 2), 1);
        assert!(!w.check_ready_to_be_decommissioned(&id));
    }

    #[test]
    fn test_drained_containers_ready() {
        let w = watcher(DrainPolicy::Containers);
        let id = NodeId::new("h1", 8041);
        w.update(&id, NodeState::Decommissioning, &status("h1", 0), 3);
        assert!(w.check_ready_to_be_decommissioned(&id));
    }

    #[test]
    fn test_apps_policy_waits_for_apps() {
        let w = watcher(DrainPolicy::ContainersAndApps);
        let id = NodeId::new("h1", 8041);
        w.update(&id, NodeState::Decommissioning, &status("h1", 0), 3);
        assert!(!w.check_ready_to_be_decommissioned(&id));
        w.update(&id, NodeState::Decommissioning, &status("h1", 0), 0);
        assert!(w.check_ready_to_be_decommissioned(&id));
    }

    #[test]
    fn test_non_decommissioning_state_clears_tracking() {
        let w = watcher(DrainPolicy::Containers);
        let id = NodeId::new("h1", 8041);
        w.update(&id, NodeState::Decommissioning, &status("h1", 1), 0);
        assert_eq!(w.tracked_count(), 1);
        w.update(&id, NodeState::Running, &status("h1", 1), 0);
        assert_eq!(w.tracked_count(), 0);
    }

    #[test]
    fn test_remove() {
        let w = watcher(DrainPolicy::Containers);
        let id = NodeId::new("h1", 8041);
        w.update(&id, NodeState::Decommissioning, &status("h1", 0), 0);
        w.remove(&id);
        assert!(!w.check_ready_to_be_decommissioned(&id));
    }
}

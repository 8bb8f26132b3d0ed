//! Core value types shared across the resource manager: node identity,
//! resource vectors, node lifecycle states, and application/container ids.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a node agent: the host it runs on and the port its
/// container-manager listens on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    pub host: String,
    pub port: u16,
}

impl NodeId {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A resource vector: memory in MiB, virtual cores, and optional extended
/// resources (GPUs, FPGAs, ...) keyed by resource name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Resource {
    pub memory_mb: u64,
    pub vcores: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extended: BTreeMap<String, i64>,
}

impl Resource {
    pub fn new(memory_mb: u64, vcores: u32) -> Self {
        Self {
            memory_mb,
            vcores,
            extended: BTreeMap::new(),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<memory:{}MiB, vcores:{}>", self.memory_mb, self.vcores)
    }
}

/// Lifecycle state of a registered node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    New,
    Running,
    Unhealthy,
    Decommissioning,
    Decommissioned,
    Lost,
    Rebooted,
    Shutdown,
}

impl NodeState {
    /// Terminal states: the record must be removed from the registry before
    /// a new record with the same id may be inserted.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeState::Decommissioned | NodeState::Lost | NodeState::Shutdown
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::New => "NEW",
            NodeState::Running => "RUNNING",
            NodeState::Unhealthy => "UNHEALTHY",
            NodeState::Decommissioning => "DECOMMISSIONING",
            NodeState::Decommissioned => "DECOMMISSIONED",
            NodeState::Lost => "LOST",
            NodeState::Rebooted => "REBOOTED",
            NodeState::Shutdown => "SHUTDOWN",
        };
        write!(f, "{s}")
    }
}

/// Identifier of a submitted application. `cluster_ts` is the epoch of the
/// resource manager incarnation that accepted the submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationId {
    pub cluster_ts: u64,
    pub id: u32,
}

impl ApplicationId {
    pub fn new(cluster_ts: u64, id: u32) -> Self {
        Self { cluster_ts, id }
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "application_{}_{:04}", self.cluster_ts, self.id)
    }
}

/// One attempt at running an application's master process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppAttemptId {
    pub app: ApplicationId,
    pub attempt: u32,
}

impl AppAttemptId {
    pub fn new(app: ApplicationId, attempt: u32) -> Self {
        Self { app, attempt }
    }
}

impl fmt::Display for AppAttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "appattempt_{}_{:04}_{:06}", self.app.cluster_ts, self.app.id, self.attempt)
    }
}

/// Identifier of a container allocated to an application attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId {
    pub attempt: AppAttemptId,
    pub id: u64,
}

impl ContainerId {
    pub fn new(attempt: AppAttemptId, id: u64) -> Self {
        Self { attempt, id }
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "container_{}_{:04}_{:06}_{:08}",
            self.attempt.app.cluster_ts, self.attempt.app.id, self.attempt.attempt, self.id
        )
    }
}

/// Compare two dot-separated version strings component-wise.
///
/// Components are parsed as integers; missing components read as zero, so
/// `"3.4"` equals `"3.4.0"`. Non-numeric trailing text in a component is
/// ignored (`"3.4.0-SNAPSHOT"` compares as `3.4.0`).
pub fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    fn parse(v: &str) -> Vec<u64> {
        v.split('.')
            .map(|c| {
                let digits: String = c.chars().take_while(|ch| ch.is_ascii_digit()).collect();
                digits.parse().unwrap_or(0)
            })
            .collect()
    }
    let (pa, pb) = (parse(a), parse(b));
    let len = pa.len().max(pb.len());
    for i in 0..len {
        let ca = pa.get(i).copied().unwrap_or(0);
        let cb = pb.get(i).copied().unwrap_or(0);
        match ca.cmp(&cb) {
            std::cmp::Ordering::Equal => continue,
            other => return other,
        }
    }
    std::cmp::Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn test_node_id_display() {
        let id = NodeId::new("worker-17.dc1", 8041);
        assert_eq!(id.to_string(), "worker-17.dc1:8041");
    }

    #[test]
    fn test_node_state_terminal() {
        assert!(NodeState::Decommissioned.is_terminal());
        assert!(NodeState::Lost.is_terminal());
        assert!(NodeState::Shutdown.is_terminal());
        assert!(!NodeState::Running.is_terminal());
        assert!(!NodeState::Decommissioning.is_terminal());
    }

    #[test]
    fn test_resource_display() {
        let r = Resource::new(8192, 4);
        assert_eq!(r.to_string(), "<memory:8192MiB, vcores:4>");
    }

    #[test]
    fn test_container_id_display() {
        let app = ApplicationId::new(1700000000000, 7);
        let attempt = AppAttemptId::new(app, 2);
        let cid = ContainerId::new(attempt, 13);
        assert_eq!(
            cid.to_string(),
            "container_1700000000000_0007_000002_00000013"
        );
    }

    #[test]
    fn test_compare_versions_basic() {
        assert_eq!(compare_versions("3.4.0", "3.4.0"), Ordering::Equal);
        assert_eq!(compare_versions("3.3.9", "3.4.0"), Ordering::Less);
        assert_eq!(compare_versions("3.10.0", "3.9.0"), Ordering::Greater);
    }

    #[test]
    fn test_compare_versions_missing_components_read_as_zero() {
        assert_eq!(compare_versions("3.4", "3.4.0"), Ordering::Equal);
        assert_eq!(compare_versions("3", "3.0.1"), Ordering::Less);
    }

    #[test]
    fn test_compare_versions_ignores_suffix() {
        assert_eq!(compare_versions("3.4.0-SNAPSHOT", "3.4.0"), Ordering::Equal);
    }
}

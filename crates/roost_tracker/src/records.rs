//! Request and response records exchanged with node agents, and the small
//! value types they carry. Any encoding works as long as fields round-trip;
//! everything here derives serde.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use roost_common::types::{ApplicationId, ContainerId, NodeId, Resource};

/// Response ids live in 31 bits and wrap through zero.
pub const RESPONSE_ID_MASK: u32 = 0x7fff_ffff;

/// Advance a response id by one position, wrapping at the mask.
pub fn next_response_id(id: u32) -> u32 {
    (id.wrapping_add(1)) & RESPONSE_ID_MASK
}

/// Control directive returned to the agent. This field is the agent's sole
/// control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeAction {
    Normal,
    Resync,
    Shutdown,
}

/// Execution state of a container as reported by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    Running,
    Complete,
}

/// Status of one container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub id: ContainerId,
    pub state: ContainerState,
    pub exit_status: i32,
    pub diagnostics: String,
}

/// Agent-reported health of the node itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeHealthStatus {
    pub healthy: bool,
    pub report: String,
    pub reported_at_ms: u64,
}

impl NodeHealthStatus {
    pub fn healthy(reported_at_ms: u64) -> Self {
        Self {
            healthy: true,
            report: String::new(),
            reported_at_ms,
        }
    }
}

/// Full node status carried by every heartbeat (and the registration).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub response_id: u32,
    pub container_statuses: Vec<ContainerStatus>,
    pub keep_alive_apps: Vec<ApplicationId>,
    pub health: NodeHealthStatus,
}

/// A rotating shared secret used to mint tokens. Opaque to the tracker; it
/// ships keys to agents and never validates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterKey {
    pub key_id: i32,
    pub bytes: Vec<u8>,
}

/// Prefix reserved for attributes authored by node agents. Heartbeat
/// batches carrying any other prefix are rejected wholesale.
pub const DISTRIBUTED_ATTRIBUTE_PREFIX: &str = "agent.roost.io";

/// A node attribute: a prefixed name/value pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAttribute {
    pub prefix: String,
    pub name: String,
    pub value: String,
}

impl NodeAttribute {
    pub fn distributed(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            prefix: DISTRIBUTED_ATTRIBUTE_PREFIX.to_string(),
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Aggregation progress of one app's logs on the reporting node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogAggregationState {
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogAggregationReport {
    pub app: ApplicationId,
    pub state: LogAggregationState,
    pub diagnostics: String,
}

/// Address and freshness stamp of a per-app timeline collector.
///
/// `rm_identifier == 0` means the entry has not been stamped by any server
/// incarnation yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppCollectorData {
    pub addr: String,
    pub rm_identifier: u64,
    pub version: u64,
}

impl AppCollectorData {
    pub fn unstamped(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            rm_identifier: 0,
            version: 0,
        }
    }

    pub fn is_stamped(&self) -> bool {
        self.rm_identifier != 0
    }

    /// Ordering predicate: does `prev` happen strictly before `next`?
    /// An absent previous entry is before everything.
    pub fn happens_before(prev: Option<&AppCollectorData>, next: &AppCollectorData) -> bool {
        match prev {
            None => true,
            Some(p) => (p.rm_identifier, p.version) < (next.rm_identifier, next.version),
        }
    }
}

/// Cap on containers an agent may hold queued for execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerQueuingLimit {
    pub max_queue_length: u32,
    pub max_queue_wait_ms: u64,
}

// ---------------------------------------------------------------------------
// RPC records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub node_id: NodeId,
    pub http_port: u16,
    pub capability: Resource,
    pub physical_capability: Option<Resource>,
    pub version: String,
    pub node_status: NodeStatus,
    /// Containers recovered from a previous agent incarnation.
    pub container_statuses: Vec<ContainerStatus>,
    pub running_apps: Vec<ApplicationId>,
    pub node_labels: Option<BTreeSet<String>>,
    pub node_attributes: Option<BTreeSet<NodeAttribute>>,
    pub log_aggregation_reports: Option<Vec<LogAggregationReport>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub action: NodeAction,
    pub diagnostics: Option<String>,
    pub container_token_master_key: Option<MasterKey>,
    pub node_token_master_key: Option<MasterKey>,
    /// Echoed back only when the dynamic resource table overrode the
    /// declared capability.
    pub resource: Option<Resource>,
    /// Cluster epoch of this server incarnation.
    pub rm_identifier: u64,
    pub rm_version: String,
    pub node_labels_accepted: bool,
    pub node_attributes_accepted: bool,
}

impl RegisterResponse {
    /// Policy rejection: SHUTDOWN plus a human-readable diagnostic.
    pub fn shutdown(diagnostics: impl Into<String>, rm_identifier: u64, rm_version: &str) -> Self {
        Self {
            action: NodeAction::Shutdown,
            diagnostics: Some(diagnostics.into()),
            container_token_master_key: None,
            node_token_master_key: None,
            resource: None,
            rm_identifier,
            rm_version: rm_version.to_string(),
            node_labels_accepted: false,
            node_attributes_accepted: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub node_status: NodeStatus,
    pub node_labels: Option<BTreeSet<String>>,
    pub node_attributes: Option<BTreeSet<NodeAttribute>>,
    pub registering_collectors: Option<BTreeMap<ApplicationId, AppCollectorData>>,
    pub last_known_container_token_key_id: i32,
    pub last_known_node_token_key_id: i32,
    pub token_sequence_no: u64,
    pub log_aggregation_reports: Option<Vec<LogAggregationReport>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub response_id: u32,
    pub action: NodeAction,
    pub diagnostics: Option<String>,
    pub container_token_master_key: Option<MasterKey>,
    pub node_token_master_key: Option<MasterKey>,
    pub resource: Option<Resource>,
    pub next_heartbeat_interval_ms: u64,
    pub container_queuing_limit: Option<ContainerQueuingLimit>,
    pub app_collectors: Option<BTreeMap<ApplicationId, AppCollectorData>>,
    pub system_credentials: Option<BTreeMap<ApplicationId, Vec<u8>>>,
    pub token_sequence_no: u64,
    pub node_labels_accepted: bool,
    pub node_attributes_accepted: bool,
}

impl HeartbeatResponse {
    /// Baseline NORMAL response; attachments are filled in by the handler.
    pub fn normal(response_id: u32, next_heartbeat_interval_ms: u64) -> Self {
        Self {
            response_id,
            action: NodeAction::Normal,
            diagnostics: None,
            container_token_master_key: None,
            node_token_master_key: None,
            resource: None,
            next_heartbeat_interval_ms,
            container_queuing_limit: None,
            app_collectors: None,
            system_credentials: None,
            token_sequence_no: 0,
            node_labels_accepted: false,
            node_attributes_accepted: false,
        }
    }

    /// Terminal response carrying only an action and a diagnostic
    /// (RESYNC and SHUTDOWN paths).
    pub fn closing(action: NodeAction, diagnostics: impl Into<String>) -> Self {
        Self {
            action,
            diagnostics: Some(diagnostics.into()),
            ..Self::normal(0, 0)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnregisterRequest {
    pub node_id: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UnregisterResponse {}

/// Append a line to an optional diagnostics field, preserving prior text.
pub fn append_diagnostics(slot: &mut Option<String>, message: &str) {
    match slot {
        Some(existing) => {
            existing.push('\n');
            existing.push_str(message);
        }
        None => *slot = Some(message.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_response_id_advances_by_one() {
        assert_eq!(next_response_id(0), 1);
        assert_eq!(next_response_id(16), 17);
    }

    #[test]
    fn test_next_response_id_wraps_at_mask() {
        assert_eq!(next_response_id(RESPONSE_ID_MASK), 0);
        assert_eq!(next_response_id(RESPONSE_ID_MASK - 1), RESPONSE_ID_MASK);
    }

    #[test]
    fn test_happens_before_none_is_before_everything() {
        let next = AppCollectorData {
            addr: "c1:1234".into(),
            rm_identifier: 1,
            version: 0,
        };
        assert!(AppCollectorData::happens_before(None, &next));
    }

    #[test]
    fn test_happens_before_orders_by_epoch_then_version() {
        let old = AppCollectorData {
            addr: "c1:1234".into(),
            rm_identifier: 5,
            version: 9,
        };
        let newer_version = AppCollectorData {
            addr: "c1:1234".into(),
            rm_identifier: 5,
            version: 10,
        };
        let newer_epoch = AppCollectorData {
            addr: "c2:1234".into(),
            rm_identifier: 6,
            version: 0,
        };
        assert!(AppCollectorData::happens_before(Some(&old), &newer_version));
        assert!(AppCollectorData::happens_before(Some(&old), &newer_epoch));
        assert!(!AppCollectorData::happens_before(Some(&newer_version), &old));
        assert!(!AppCollectorData::happens_before(Some(&old), &old));
    }

    #[test]
    fn test_unstamped_collector() {
        let data = AppCollectorData::unstamped("c1:1234");
        assert!(!data.is_stamped());
    }

    #[test]
    fn test_append_diagnostics_joins_lines() {
        let mut slot = None;
        append_diagnostics(&mut slot, "first");
        append_diagnostics(&mut slot, "second");
        assert_eq!(slot.as_deref(), Some("first\nsecond"));
    }

    #[test]
    fn test_closing_response_carries_action_and_message() {
        let resp = HeartbeatResponse::closing(NodeAction::Resync, "node not found");
        assert_eq!(resp.action, NodeAction::Resync);
        assert_eq!(resp.diagnostics.as_deref(), Some("node not found"));
        assert_eq!(resp.response_id, 0);
    }
}

//! Node tracker service — the membership endpoint of the roost resource
//! manager. Node agents register, heartbeat, and unregister here; the
//! tracker admits them against policy, keeps the authoritative registry,
//! watches liveness and decommission drain, and fans node state out to the
//! event bus while returning control directives and key material.

pub mod admission;
pub mod collectors;
pub mod decommission;
pub mod dynres;
pub mod events;
pub mod liveness;
pub mod pacing;
pub mod ports;
pub mod records;
pub mod registry;
pub mod tracker;

pub use dynres::DynamicResourceTable;
pub use events::{EventDispatcher, EventSink, LifecycleKind, TrackerEvent, VecSink};
pub use records::{
    AppCollectorData, ContainerQueuingLimit, ContainerState, ContainerStatus, HeartbeatRequest,
    HeartbeatResponse, LogAggregationReport, MasterKey, NodeAction, NodeAttribute,
    NodeHealthStatus, NodeStatus, RegisterRequest, RegisterResponse, UnregisterRequest,
    UnregisterResponse, DISTRIBUTED_ATTRIBUTE_PREFIX,
};
pub use registry::{ClusterMetrics, ClusterMetricsSnapshot, NodeRecord, NodeRegistry};
pub use tracker::{NodeTracker, TrackerPorts};

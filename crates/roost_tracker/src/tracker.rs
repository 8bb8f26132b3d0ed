//! The node tracker service: registration, heartbeat, and unregistration
//! handlers over the registry, liveness monitor, decommission watcher, and
//! event bus.
//!
//! Handlers run on the RPC server's worker threads. They read hot config
//! under the service-wide read guard, serialize per node on the record's
//! own lock, and never block on I/O; everything external goes through
//! injected ports or the non-blocking event dispatcher.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use roost_common::config::{LabelMode, PacingConfig, TrackerConfig};
use roost_common::error::{RoostError, RoostResult, TrackerError};
use roost_common::types::{NodeId, NodeState, Resource};

use crate::admission;
use crate::collectors::TimelineCollectors;
use crate::decommission::DecommissionWatcher;
use crate::dynres::DynamicResourceTable;
use crate::events::{EventDispatcher, LifecycleKind, TrackerEvent};
use crate::liveness::LivenessMonitor;
use crate::pacing;
use crate::ports::{
    AppRegistry, DelegatedNodeLabelsUpdater, HostResolver, NodeAttributesManager,
    NodeLabelManager, NodeTokenKeyStore, NodesListManager, QueueLimitCalculator, RackResolver,
    TokenKeyStore,
};
use crate::records::{
    append_diagnostics, next_response_id, ContainerState, ContainerStatus, HeartbeatRequest,
    HeartbeatResponse, NodeAction, NodeAttribute, RegisterRequest, RegisterResponse,
    UnregisterRequest, UnregisterResponse, DISTRIBUTED_ATTRIBUTE_PREFIX,
};
use crate::registry::{ClusterMetrics, NodeRecord, NodeRegistry};

/// Injected collaborators. Each is a narrow port; none are optional except
/// the queuing-limit calculator.
pub struct TrackerPorts {
    pub nodes_list: Arc<dyn NodesListManager>,
    pub rack_resolver: Arc<dyn RackResolver>,
    pub host_resolver: Arc<dyn HostResolver>,
    pub label_manager: Arc<dyn NodeLabelManager>,
    pub delegated_labels: Arc<dyn DelegatedNodeLabelsUpdater>,
    pub attributes: Arc<dyn NodeAttributesManager>,
    pub container_token_keys: Arc<dyn TokenKeyStore>,
    pub node_token_keys: Arc<dyn NodeTokenKeyStore>,
    pub apps: Arc<dyn AppRegistry>,
    pub queue_limits: Option<Arc<dyn QueueLimitCalculator>>,
}

/// Hot-swappable fields, guarded by one service-wide reader-writer lock.
/// Handlers take the read side; admin update verbs take the write side.
struct HotConfig {
    pacing: PacingConfig,
    dyn_resources: DynamicResourceTable,
}

pub struct NodeTracker {
    config: TrackerConfig,
    server_version: String,
    /// Cluster epoch: fixed at construction, identifies this incarnation.
    cluster_epoch: u64,
    hot: RwLock<HotConfig>,
    registry: NodeRegistry,
    metrics: ClusterMetrics,
    liveness: LivenessMonitor,
    decommission: DecommissionWatcher,
    collectors: TimelineCollectors,
    dispatcher: Arc<EventDispatcher>,
    ports: TrackerPorts,
}

impl NodeTracker {
    pub fn new(
        config: TrackerConfig,
        server_version: impl Into<String>,
        ports: TrackerPorts,
    ) -> Arc<Self> {
        let cluster_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let dispatcher = Arc::new(EventDispatcher::new());
        let hot = HotConfig {
            pacing: config.pacing.clone().normalized(),
            dyn_resources: DynamicResourceTable::from_seeds(&config.dynamic_resources),
        };
        Arc::new(Self {
            liveness: LivenessMonitor::new(&config.liveness, Arc::clone(&dispatcher)),
            decommission: DecommissionWatcher::new(&config.decommission),
            collectors: TimelineCollectors::new(cluster_epoch),
            hot: RwLock::new(hot),
            registry: NodeRegistry::new(),
            metrics: ClusterMetrics::new(),
            server_version: server_version.into(),
            cluster_epoch,
            dispatcher,
            config,
            ports,
        })
    }

    /// Start background machinery (liveness expiry scan).
    pub fn start(&self) {
        self.liveness.start();
        tracing::info!(
            bind_addr = %self.config.bind_addr,
            client_threads = self.config.client_threads,
            cluster_epoch = self.cluster_epoch,
            "node tracker started"
        );
    }

    /// Stop background machinery.
    pub fn stop(&self) {
        self.liveness.stop();
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &ClusterMetrics {
        &self.metrics
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn liveness(&self) -> &LivenessMonitor {
        &self.liveness
    }

    pub fn cluster_epoch(&self) -> u64 {
        self.cluster_epoch
    }

    // -- admin update verbs -------------------------------------------------

    /// Replace the heartbeat pacing configuration at runtime.
    pub fn update_pacing(&self, pacing: PacingConfig) {
        self.hot.write().pacing = pacing.normalized();
    }

    /// Replace the dynamic resource snapshot at runtime.
    pub fn update_dynamic_resources(&self, table: DynamicResourceTable) {
        self.hot.write().dyn_resources = table;
    }

    /// Resize one registered node. The new capability is synced to the
    /// agent on its next heartbeat. Returns false when the node is unknown.
    pub fn update_node_resource(&self, node_id: &NodeId, resource: Resource) -> bool {
        match self.registry.get(node_id) {
            Some(record) => {
                tracing::info!(node = %node_id, capability = %resource, "node resized");
                record.lock().set_total_capability(resource);
                true
            }
            None => {
                tracing::warn!(node = %node_id, "cannot resize unknown node");
                false
            }
        }
    }

    // -- register -----------------------------------------------------------

    pub fn register_node(
        &self,
        req: RegisterRequest,
        remote_ip: Option<IpAddr>,
    ) -> RoostResult<RegisterResponse> {
        let node_id = req.node_id.clone();
        let host = node_id.host.clone();

        if let Err(message) = admission::check_version_floor(
            &self.config.min_version,
            &self.server_version,
            &req.version,
        ) {
            tracing::info!(node = %node_id, "{message}, sending SHUTDOWN");
            return Ok(self.register_rejection(message));
        }

        if let Err(message) = admission::check_host_resolution(
            self.config.check_host_resolution,
            self.ports.host_resolver.as_ref(),
            &host,
            remote_ip,
        ) {
            tracing::warn!(node = %node_id, "unresolved node agent registration: {message}");
            return Ok(self.register_rejection(message));
        }

        if let Err(message) = admission::check_admission_list(
            self.ports.nodes_list.is_valid_node(&host),
            self.is_node_decommissioning(&node_id),
            &host,
        ) {
            tracing::info!(node = %node_id, "{message}, sending SHUTDOWN");
            return Ok(self.register_rejection(message));
        }

        let mut capability = req.capability.clone();
        let mut overridden = false;
        if let Some(adjusted) = self.dynamic_override(&node_id) {
            tracing::debug!(
                node = %node_id,
                declared = %capability,
                adjusted = %adjusted,
                "capability adjusted by the dynamic resource table"
            );
            capability = adjusted;
            overridden = true;
        }

        if let Err(message) = admission::check_min_allocation(
            &capability,
            self.config.min_alloc_mb,
            self.config.min_alloc_vcores,
            &host,
        ) {
            tracing::info!(node = %node_id, "{message}, sending SHUTDOWN");
            return Ok(self.register_rejection(message));
        }

        let mut response = RegisterResponse {
            action: NodeAction::Normal,
            diagnostics: None,
            container_token_master_key: Some(self.ports.container_token_keys.current_key()?),
            node_token_master_key: Some(self.ports.node_token_keys.current_key()?),
            resource: overridden.then(|| capability.clone()),
            rm_identifier: self.cluster_epoch,
            rm_version: self.server_version.clone(),
            node_labels_accepted: false,
            node_attributes_accepted: false,
        };

        let record = NodeRecord::new(
            node_id.clone(),
            req.http_port,
            self.ports.rack_resolver.resolve(&host),
            req.version.clone(),
            capability.clone(),
            req.physical_capability.clone(),
            overridden,
            req.running_apps.iter().copied(),
        );

        match self.registry.put_if_absent(record.clone()) {
            None => {
                self.dispatcher.publish(TrackerEvent::NodeStarted {
                    node_id: node_id.clone(),
                    container_statuses: Some(req.container_statuses.clone()),
                    running_apps: Some(req.running_apps.clone()),
                    node_status: req.node_status.clone(),
                    log_aggregation: req.log_aggregation_reports.clone(),
                });
            }
            Some(existing) => {
                tracing::info!(node = %node_id, "reconnect from node agent");
                self.liveness.unregister(&node_id);
                let (old_state, old_http_port) = {
                    let old = existing.lock();
                    (old.state, old.http_port)
                };
                if req.running_apps.is_empty()
                    && old_state != NodeState::Decommissioning
                    && req.http_port != old_http_port
                {
                    // Reconnected node differs: replace the old entry.
                    self.metrics.decrement_state(old_state);
                    self.dispatcher.publish(TrackerEvent::NodeRemoved {
                        node_id: node_id.clone(),
                        state: old_state,
                    });
                    self.registry.replace(record);
                    self.dispatcher.publish(TrackerEvent::NodeStarted {
                        node_id: node_id.clone(),
                        container_statuses: None,
                        running_apps: None,
                        node_status: req.node_status.clone(),
                        log_aggregation: None,
                    });
                } else {
                    // Agent restarted in place: expect response id 0 next.
                    {
                        let mut old = existing.lock();
                        old.reset_last_response();
                        old.touch_ping();
                    }
                    self.dispatcher.publish(TrackerEvent::NodeReconnected {
                        node_id: node_id.clone(),
                        http_port: req.http_port,
                        running_apps: req.running_apps.clone(),
                        container_statuses: req.container_statuses.clone(),
                    });
                }
            }
        }

        // Any key material cached for a previous incarnation of this node is
        // now stale.
        self.ports.node_token_keys.remove_node_key(&node_id);
        self.liveness.register(node_id.clone());

        if !self.config.work_preserving_recovery && !req.container_statuses.is_empty() {
            tracing::info!(
                node = %node_id,
                count = req.container_statuses.len(),
                "received container statuses on registration"
            );
            for status in &req.container_statuses {
                self.handle_registration_container_status(status);
            }
        }

        match self.config.label_mode {
            LabelMode::Distributed => {
                if let Some(labels) = &req.node_labels {
                    match self.update_labels_from_report(&node_id, labels) {
                        Ok(()) => response.node_labels_accepted = true,
                        Err(e) => append_diagnostics(&mut response.diagnostics, &e.to_string()),
                    }
                }
            }
            LabelMode::DelegatedCentralized => {
                self.ports.delegated_labels.update_node_labels(&node_id);
            }
            LabelMode::Centralized => {}
        }

        if let Some(attributes) = &req.node_attributes {
            match self.update_node_attributes_if_necessary(&node_id, attributes) {
                Ok(()) => response.node_attributes_accepted = true,
                Err(e) => append_diagnostics(&mut response.diagnostics, &e.to_string()),
            }
        }

        tracing::info!(
            node = %node_id,
            http_port = req.http_port,
            capability = %capability,
            labels_accepted = response.node_labels_accepted,
            attributes_accepted = response.node_attributes_accepted,
            "node agent registered"
        );
        Ok(response)
    }

    // -- heartbeat ----------------------------------------------------------

    pub fn node_heartbeat(&self, req: HeartbeatRequest) -> RoostResult<HeartbeatResponse> {
        let status = &req.node_status;
        let node_id = status.node_id.clone();
        let host = node_id.host.clone();

        // 1. Still a valid (not excluded) node, or draining?
        if !self.ports.nodes_list.is_valid_node(&host) && !self.is_node_decommissioning(&node_id) {
            let message = format!("disallowed node agent {node_id}, hostname {host}");
            tracing::info!("{message}");
            return Ok(HeartbeatResponse::closing(NodeAction::Shutdown, message));
        }

        // 2. Registered?
        let Some(record) = self.registry.get(&node_id) else {
            let message = format!("node not found, resyncing {node_id}");
            tracing::info!("{message}");
            return Ok(HeartbeatResponse::closing(NodeAction::Resync, message));
        };

        // 3. Liveness ping and drain bookkeeping. The ping lands for
        // duplicates too. The record lock is held from here through the
        // response cache at the end: concurrent heartbeats for the same
        // node serialize, and a retransmit can never observe an advanced
        // counter with a stale cached response.
        self.liveness.received_ping(&node_id);
        let mut rec = record.lock();
        rec.touch_ping();
        let running_apps: Vec<_> = rec.running_apps.iter().copied().collect();
        self.decommission
            .update(&node_id, rec.state, status, running_apps.len());

        // 4. Response-id arbitration.
        if next_response_id(status.response_id) == rec.last_response_id {
            tracing::info!(
                node = %node_id,
                response_id = status.response_id,
                "received duplicate heartbeat"
            );
            return Ok(rec.last_response.clone());
        }
        if status.response_id != rec.last_response_id {
            let message = format!(
                "too far behind; rm response id {}, agent response id {}",
                rec.last_response_id, status.response_id
            );
            tracing::info!(node = %node_id, "{message}");
            // TODO: REBOOT+RESYNC may not recover an agent this far
            // behind; needs a protocol-level fix.
            self.dispatcher.publish(TrackerEvent::NodeLifecycle {
                node_id: node_id.clone(),
                kind: LifecycleKind::Rebooting,
            });
            return Ok(HeartbeatResponse::closing(NodeAction::Resync, message));
        }

        // 5. A drained DECOMMISSIONING node is done.
        if rec.state == NodeState::Decommissioning
            && self.decommission.check_ready_to_be_decommissioned(&node_id)
        {
            let message = format!("DECOMMISSIONING {node_id} is ready to be decommissioned");
            tracing::info!("{message}");
            self.dispatcher.publish(TrackerEvent::NodeLifecycle {
                node_id: node_id.clone(),
                kind: LifecycleKind::Decommission,
            });
            self.liveness.unregister(&node_id);
            self.decommission.remove(&node_id);
            return Ok(HeartbeatResponse::closing(NodeAction::Shutdown, message));
        }

        // Fresh heartbeat: advance by exactly one and capture the pacing
        // signal.
        rec.last_response_id = next_response_id(rec.last_response_id);
        rec.last_status_signal = status.container_statuses.len();
        let response_id = rec.last_response_id;
        let signal = rec.last_status_signal;

        // 6. Timeline collectors registering through this heartbeat.
        if self.config.timeline_v2_enabled {
            if let Some(registering) = &req.registering_collectors {
                self.collectors
                    .process_registrations(registering, self.ports.apps.as_ref());
            }
        }

        // 7. Pacing and the baseline response.
        let interval = {
            let hot = self.hot.read();
            pacing::next_heartbeat_interval(&hot.pacing, signal)
        };
        let mut response = HeartbeatResponse::normal(response_id, interval);

        // 8. Key rotation: ship the next key unless the agent already has it.
        if let Some(next) = self.ports.container_token_keys.next_key()? {
            if next.key_id != req.last_known_container_token_key_id {
                response.container_token_master_key = Some(next);
            }
        }
        if let Some(next) = self.ports.node_token_keys.next_key()? {
            if next.key_id != req.last_known_node_token_key_id {
                response.node_token_master_key = Some(next);
            }
        }

        // 9. Token sequence and per-app credentials.
        let sequence = self.ports.apps.token_sequence_no();
        if req.token_sequence_no != sequence {
            let credentials = self.ports.apps.system_credentials();
            if !credentials.is_empty() {
                tracing::debug!(node = %node_id, "sending system credentials for apps");
                response.system_credentials = Some(credentials);
            }
        }
        response.token_sequence_no = sequence;

        if self.config.timeline_v2_enabled {
            response.app_collectors = Some(
                self.collectors
                    .collectors_for(running_apps.iter().copied(), self.ports.apps.as_ref()),
            );
        }

        // 10. Fan the status report out to the rest of the resource manager.
        self.dispatcher.publish(TrackerEvent::NodeStatusUpdate {
            node_id: node_id.clone(),
            status: status.clone(),
            log_aggregation: req.log_aggregation_reports.clone(),
        });

        // 11. Labels and attributes.
        if self.config.label_mode == LabelMode::Distributed {
            if let Some(labels) = &req.node_labels {
                match self.update_labels_from_report(&node_id, labels) {
                    Ok(()) => response.node_labels_accepted = true,
                    Err(e) => append_diagnostics(&mut response.diagnostics, &e.to_string()),
                }
            }
        }
        if let Some(attributes) = &req.node_attributes {
            match self.update_node_attributes_if_necessary(&node_id, attributes) {
                Ok(()) => response.node_attributes_accepted = true,
                Err(e) => append_diagnostics(&mut response.diagnostics, &e.to_string()),
            }
        }

        // 12. Capability sync: dynamic override wins, else an admin resize
        // pending on the record.
        if let Some(adjusted) = self.dynamic_override(&node_id) {
            response.resource = Some(adjusted);
        } else if rec.updated_capability_pending {
            response.resource = Some(rec.total_capability.clone());
            rec.updated_capability_pending = false;
        }

        // 13. Container queuing limits.
        if let Some(calculator) = &self.ports.queue_limits {
            response.container_queuing_limit = Some(calculator.container_queuing_limit());
        }

        // Cache for idempotent replay, atomic with the id advance above.
        rec.last_response = response.clone();
        Ok(response)
    }

    // -- unregister ---------------------------------------------------------

    pub fn unregister_node(&self, req: UnregisterRequest) -> RoostResult<UnregisterResponse> {
        let node_id = req.node_id;
        if !self.registry.contains(&node_id) {
            tracing::info!(node = %node_id, "node not found, ignoring unregister");
            return Ok(UnregisterResponse {});
        }
        tracing::info!(node = %node_id, "node agent has shut down, unregistering");
        self.liveness.unregister(&node_id);
        self.dispatcher.publish(TrackerEvent::NodeLifecycle {
            node_id,
            kind: LifecycleKind::Shutdown,
        });
        Ok(UnregisterResponse {})
    }

    // -- helpers ------------------------------------------------------------

    fn register_rejection(&self, message: String) -> RegisterResponse {
        RegisterResponse::shutdown(message, self.cluster_epoch, &self.server_version)
    }

    /// A node counts as decommissioning when its record says so, or when it
    /// is running and the admission lists flag it gracefully
    /// decommissionable.
    fn is_node_decommissioning(&self, node_id: &NodeId) -> bool {
        match self.registry.get(node_id) {
            Some(record) => {
                let state = record.lock().state;
                state == NodeState::Decommissioning
                    || (state == NodeState::Running
                        && self.ports.nodes_list.is_gracefully_decommissionable(node_id))
            }
            None => false,
        }
    }

    fn dynamic_override(&self, node_id: &NodeId) -> Option<Resource> {
        self.hot.read().dyn_resources.lookup(node_id).cloned()
    }

    /// A container reported at registration that completed the master
    /// container of a managed AM becomes a finished-container event for the
    /// attempt.
    fn handle_registration_container_status(&self, status: &ContainerStatus) {
        let attempt = status.id.attempt;
        let app = attempt.app;
        if !self.ports.apps.contains_app(&app) {
            tracing::error!(
                container = %status.id,
                app = %app,
                "received finished container for unknown application, skipping"
            );
            return;
        }
        if self.ports.apps.is_unmanaged(&app) {
            tracing::debug!(app = %app, "ignoring container completion for unmanaged AM");
            return;
        }
        let Some(master) = self.ports.apps.master_container(&attempt) else {
            tracing::info!(attempt = %attempt, "ignoring not found attempt");
            return;
        };
        if master == status.id && status.state == ContainerState::Complete {
            self.dispatcher.publish(TrackerEvent::ContainerFinished {
                attempt,
                status: status.clone(),
            });
        }
    }

    fn update_labels_from_report(
        &self,
        node_id: &NodeId,
        labels: &BTreeSet<String>,
    ) -> RoostResult<()> {
        let mut updates = BTreeMap::new();
        updates.insert(node_id.clone(), labels.clone());
        self.ports
            .label_manager
            .replace_labels_on_node(&updates)
            .map_err(|reason| {
                let message = format!(
                    "node labels {labels:?} reported from {node_id} were rejected: {reason}"
                );
                tracing::error!("{message}");
                RoostError::from(TrackerError::LabelUpdate(message))
            })?;
        tracing::debug!(node = %node_id, ?labels, "node labels accepted");
        Ok(())
    }

    fn update_node_attributes_if_necessary(
        &self,
        node_id: &NodeId,
        attributes: &BTreeSet<NodeAttribute>,
    ) -> RoostResult<()> {
        if !attributes
            .iter()
            .all(|a| a.prefix == DISTRIBUTED_ATTRIBUTE_PREFIX)
        {
            return Err(TrackerError::AttributeUpdate(format!(
                "rejecting node attributes from {node_id}: attributes in a heartbeat \
                 must carry prefix {DISTRIBUTED_ATTRIBUTE_PREFIX}"
            ))
            .into());
        }
        let current: BTreeSet<NodeAttribute> = self
            .ports
            .attributes
            .attributes_for_host(&node_id.host)
            .into_iter()
            .filter(|a| a.prefix == DISTRIBUTED_ATTRIBUTE_PREFIX)
            .collect();
        if *attributes != current {
            let mut updates = BTreeMap::new();
            updates.insert(node_id.host.clone(), attributes.clone());
            self.ports
                .attributes
                .replace_node_attributes(DISTRIBUTED_ATTRIBUTE_PREFIX, &updates)
                .map_err(|reason| {
                    RoostError::from(TrackerError::AttributeUpdate(format!(
                        "node attributes from {node_id} were rejected: {reason}"
                    )))
                })?;
        } else {
            tracing::debug!(node = %node_id, "skipping attribute update, no change");
        }
        Ok(())
    }
}

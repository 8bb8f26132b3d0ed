//! Collaborator interfaces the tracker consumes, plus in-memory
//! implementations used by the server assembly and the test suites.
//!
//! Each port is a narrow trait injected at construction; the tracker never
//! reaches for a service locator.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use roost_common::error::{RoostResult, TrackerError};
use roost_common::types::{AppAttemptId, ApplicationId, ContainerId, NodeId};

use crate::records::{AppCollectorData, ContainerQueuingLimit, MasterKey, NodeAttribute};

/// Admission list view: which hosts may join, and which draining nodes may
/// keep reporting after exclusion.
pub trait NodesListManager: Send + Sync {
    fn is_valid_node(&self, host: &str) -> bool;
    fn is_gracefully_decommissionable(&self, node_id: &NodeId) -> bool;
}

/// Network topology resolution.
pub trait RackResolver: Send + Sync {
    fn resolve(&self, host: &str) -> String;
}

/// Resolvability of a declared hostname, as seen from the resource manager.
pub trait HostResolver: Send + Sync {
    fn resolve_host(&self, host: &str) -> Option<IpAddr>;
}

/// Central node-label store.
pub trait NodeLabelManager: Send + Sync {
    fn replace_labels_on_node(
        &self,
        updates: &BTreeMap<NodeId, BTreeSet<String>>,
    ) -> Result<(), String>;
}

/// Centralized-with-delegation label refresh.
pub trait DelegatedNodeLabelsUpdater: Send + Sync {
    fn update_node_labels(&self, node_id: &NodeId);
}

/// Node attribute store.
pub trait NodeAttributesManager: Send + Sync {
    fn attributes_for_host(&self, host: &str) -> BTreeSet<NodeAttribute>;
    fn replace_node_attributes(
        &self,
        prefix: &str,
        updates: &BTreeMap<String, BTreeSet<NodeAttribute>>,
    ) -> Result<(), String>;
}

/// Rotating master-key access. The tracker ships keys; it never mints or
/// validates tokens itself.
pub trait TokenKeyStore: Send + Sync {
    fn current_key(&self) -> RoostResult<MasterKey>;
    fn next_key(&self) -> RoostResult<Option<MasterKey>>;
}

/// Key store that additionally caches per-node key material which must be
/// cleared whenever the node re-registers.
pub trait NodeTokenKeyStore: TokenKeyStore {
    fn remove_node_key(&self, node_id: &NodeId);
}

/// Container queuing limits pushed to agents, when a calculator is
/// installed.
pub trait QueueLimitCalculator: Send + Sync {
    fn container_queuing_limit(&self) -> ContainerQueuingLimit;
}

/// View of running applications: AM bookkeeping, timeline collectors, and
/// per-app credentials.
pub trait AppRegistry: Send + Sync {
    fn contains_app(&self, app: &ApplicationId) -> bool;
    fn is_unmanaged(&self, app: &ApplicationId) -> bool;
    fn master_container(&self, attempt: &AppAttemptId) -> Option<ContainerId>;

    fn collector_data(&self, app: &ApplicationId) -> Option<AppCollectorData>;
    /// Atomically install `data` for `app` when `newer` says it supersedes
    /// the stored entry. Returns whether the store was updated.
    fn update_collector_if(
        &self,
        app: &ApplicationId,
        data: AppCollectorData,
        newer: &dyn Fn(Option<&AppCollectorData>, &AppCollectorData) -> bool,
    ) -> bool;

    fn token_sequence_no(&self) -> u64;
    fn system_credentials(&self) -> BTreeMap<ApplicationId, Vec<u8>>;
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

/// Include/exclude lists held in memory; hot-swappable by the admin.
#[derive(Default)]
pub struct StaticNodesList {
    /// When non-empty, only listed hosts are valid.
    include: RwLock<HashSet<String>>,
    exclude: RwLock<HashSet<String>>,
    graceful: RwLock<HashSet<NodeId>>,
}

impl StaticNodesList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_include(&self, hosts: impl IntoIterator<Item = String>) {
        *self.include.write() = hosts.into_iter().collect();
    }

    pub fn exclude_host(&self, host: impl Into<String>) {
        self.exclude.write().insert(host.into());
    }

    pub fn clear_exclusions(&self) {
        self.exclude.write().clear();
    }

    pub fn mark_gracefully_decommissionable(&self, node_id: NodeId) {
        self.graceful.write().insert(node_id);
    }
}

impl NodesListManager for StaticNodesList {
    fn is_valid_node(&self, host: &str) -> bool {
        if self.exclude.read().contains(host) {
            return false;
        }
        let include = self.include.read();
        include.is_empty() || include.contains(host)
    }

    fn is_gracefully_decommissionable(&self, node_id: &NodeId) -> bool {
        self.graceful.read().contains(node_id)
    }
}

/// Resolves every host to a single fixed rack path.
pub struct FlatRackResolver {
    rack: String,
}

impl FlatRackResolver {
    pub fn new(rack: impl Into<String>) -> Self {
        Self { rack: rack.into() }
    }
}

impl Default for FlatRackResolver {
    fn default() -> Self {
        Self::new("/default-rack")
    }
}

impl RackResolver for FlatRackResolver {
    fn resolve(&self, _host: &str) -> String {
        self.rack.clone()
    }
}

/// Host resolver backed by a fixed table. Used in tests and static
/// deployments.
#[derive(Default)]
pub struct TableHostResolver {
    entries: RwLock<HashMap<String, IpAddr>>,
}

impl TableHostResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, host: impl Into<String>, ip: IpAddr) {
        self.entries.write().insert(host.into(), ip);
    }
}

impl HostResolver for TableHostResolver {
    fn resolve_host(&self, host: &str) -> Option<IpAddr> {
        self.entries.read().get(host).copied()
    }
}

/// Host resolver that asks the operating system.
#[derive(Default)]
pub struct SystemHostResolver;

impl HostResolver for SystemHostResolver {
    fn resolve_host(&self, host: &str) -> Option<IpAddr> {
        (host, 0)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .map(|addr| addr.ip())
    }
}

/// Label store recording the last replacement per node. Can be told to
/// fail, for exercising the degraded-heartbeat path.
#[derive(Default)]
pub struct InMemoryLabelStore {
    labels: Mutex<HashMap<NodeId, BTreeSet<String>>>,
    replace_calls: AtomicU64,
    fail_with: Mutex<Option<String>>,
}

impl InMemoryLabelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels_for(&self, node_id: &NodeId) -> Option<BTreeSet<String>> {
        self.labels.lock().get(node_id).cloned()
    }

    pub fn replace_calls(&self) -> u64 {
        self.replace_calls.load(Ordering::Relaxed)
    }

    pub fn fail_next(&self, message: impl Into<String>) {
        *self.fail_with.lock() = Some(message.into());
    }
}

impl NodeLabelManager for InMemoryLabelStore {
    fn replace_labels_on_node(
        &self,
        updates: &BTreeMap<NodeId, BTreeSet<String>>,
    ) -> Result<(), String> {
        if let Some(message) = self.fail_with.lock().take() {
            return Err(message);
        }
        self.replace_calls.fetch_add(1, Ordering::Relaxed);
        let mut labels = self.labels.lock();
        for (node_id, set) in updates {
            labels.insert(node_id.clone(), set.clone());
        }
        Ok(())
    }
}

/// Delegated updater that only counts refresh requests.
#[derive(Default)]
pub struct RecordingDelegatedUpdater {
    calls: Mutex<Vec<NodeId>>,
}

impl RecordingDelegatedUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<NodeId> {
        self.calls.lock().clone()
    }
}

impl DelegatedNodeLabelsUpdater for RecordingDelegatedUpdater {
    fn update_node_labels(&self, node_id: &NodeId) {
        self.calls.lock().push(node_id.clone());
    }
}

/// Attribute store keyed by host. Counts replacements so tests can assert
/// the no-change short circuit.
#[derive(Default)]
pub struct InMemoryAttributeStore {
    attributes: Mutex<HashMap<String, BTreeSet<NodeAttribute>>>,
    replace_calls: AtomicU64,
    fail_with: Mutex<Option<String>>,
}

impl InMemoryAttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_calls(&self) -> u64 {
        self.replace_calls.load(Ordering::Relaxed)
    }

    pub fn fail_next(&self, message: impl Into<String>) {
        *self.fail_with.lock() = Some(message.into());
    }
}

impl NodeAttributesManager for InMemoryAttributeStore {
    fn attributes_for_host(&self, host: &str) -> BTreeSet<NodeAttribute> {
        self.attributes.lock().get(host).cloned().unwrap_or_default()
    }

    fn replace_node_attributes(
        &self,
        _prefix: &str,
        updates: &BTreeMap<String, BTreeSet<NodeAttribute>>,
    ) -> Result<(), String> {
        if let Some(message) = self.fail_with.lock().take() {
            return Err(message);
        }
        self.replace_calls.fetch_add(1, Ordering::Relaxed);
        let mut attributes = self.attributes.lock();
        for (host, set) in updates {
            attributes.insert(host.clone(), set.clone());
        }
        Ok(())
    }
}

/// Master key store with explicit rotation control. `roll()` installs the
/// next key; `activate_next()` promotes it to current.
pub struct InMemoryKeyStore {
    current: Mutex<MasterKey>,
    next: Mutex<Option<MasterKey>>,
    removed_node_keys: Mutex<Vec<NodeId>>,
    poisoned: AtomicBool,
}

impl InMemoryKeyStore {
    pub fn new(key_id: i32) -> Self {
        Self {
            current: Mutex::new(MasterKey {
                key_id,
                bytes: vec![0xAB; 8],
            }),
            next: Mutex::new(None),
            removed_node_keys: Mutex::new(Vec::new()),
            poisoned: AtomicBool::new(false),
        }
    }

    /// Stage a new key for rotation.
    pub fn roll(&self, key: MasterKey) {
        *self.next.lock() = Some(key);
    }

    /// Promote the staged key to current.
    pub fn activate_next(&self) {
        if let Some(key) = self.next.lock().take() {
            *self.current.lock() = key;
        }
    }

    /// Make every access fail, for exercising the fatal path.
    pub fn poison(&self) {
        self.poisoned.store(true, Ordering::SeqCst);
    }

    pub fn removed_node_keys(&self) -> Vec<NodeId> {
        self.removed_node_keys.lock().clone()
    }

    fn check(&self) -> RoostResult<()> {
        if self.poisoned.load(Ordering::SeqCst) {
            return Err(TrackerError::KeyStore("key store offline".into()).into());
        }
        Ok(())
    }
}

impl TokenKeyStore for InMemoryKeyStore {
    fn current_key(&self) -> RoostResult<MasterKey> {
        self.check()?;
        Ok(self.current.lock().clone())
    }

    fn next_key(&self) -> RoostResult<Option<MasterKey>> {
        self.check()?;
        Ok(self.next.lock().clone())
    }
}

impl NodeTokenKeyStore for InMemoryKeyStore {
    fn remove_node_key(&self, node_id: &NodeId) {
        self.removed_node_keys.lock().push(node_id.clone());
    }
}

/// Fixed container queuing limits.
pub struct FixedQueueLimits {
    limit: ContainerQueuingLimit,
}

impl FixedQueueLimits {
    pub fn new(limit: ContainerQueuingLimit) -> Self {
        Self { limit }
    }
}

impl QueueLimitCalculator for FixedQueueLimits {
    fn container_queuing_limit(&self) -> ContainerQueuingLimit {
        self.limit
    }
}

#[derive(Debug, Clone, Default)]
struct AppEntry {
    unmanaged: bool,
    master_container: Option<ContainerId>,
    collector: Option<AppCollectorData>,
}

/// Application registry with collector slots and system credentials.
#[derive(Default)]
pub struct InMemoryAppRegistry {
    apps: Mutex<HashMap<ApplicationId, AppEntry>>,
    token_sequence: AtomicU64,
    credentials: Mutex<BTreeMap<ApplicationId, Vec<u8>>>,
}

impl InMemoryAppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_app(&self, app: ApplicationId, unmanaged: bool) {
        self.apps.lock().entry(app).or_insert(AppEntry {
            unmanaged,
            ..AppEntry::default()
        });
    }

    pub fn set_master_container(&self, attempt: AppAttemptId, container: ContainerId) {
        let mut apps = self.apps.lock();
        let entry = apps.entry(attempt.app).or_default();
        entry.master_container = Some(container);
    }

    pub fn set_credentials(&self, app: ApplicationId, tokens: Vec<u8>) {
        self.credentials.lock().insert(app, tokens);
        self.token_sequence.fetch_add(1, Ordering::SeqCst);
    }
}

impl AppRegistry for InMemoryAppRegistry {
    fn contains_app(&self, app: &ApplicationId) -> bool {
        self.apps.lock().contains_key(app)
    }

    fn is_unmanaged(&self, app: &ApplicationId) -> bool {
        self.apps.lock().get(app).map(|e| e.unmanaged).unwrap_or(false)
    }

    fn master_container(&self, attempt: &AppAttemptId) -> Option<ContainerId> {
        self.apps
            .lock()
            .get(&attempt.app)
            .and_then(|e| e.master_container)
    }

    fn collector_data(&self, app: &ApplicationId) -> Option<AppCollectorData> {
        self.apps.lock().get(app).and_then(|e| e.collector.clone())
    }

    fn update_collector_if(
        &self,
        app: &ApplicationId,
        data: AppCollectorData,
        newer: &dyn Fn(Option<&AppCollectorData>, &AppCollectorData) -> bool,
    ) -> bool {
        let mut apps = self.apps.lock();
        let Some(entry) = apps.get_mut(app) else {
            return false;
        };
        if newer(entry.collector.as_ref(), &data) {
            entry.collector = Some(data);
            true
        } else {
            false
        }
    }

    fn token_sequence_no(&self) -> u64 {
        self.token_sequence.load(Ordering::SeqCst)
    }

    fn system_credentials(&self) -> BTreeMap<ApplicationId, Vec<u8>> {
        self.credentials.lock().clone()
    }
}

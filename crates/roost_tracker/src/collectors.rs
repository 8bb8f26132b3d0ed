//! Timeline (v2) collector bookkeeping.
//!
//! Agents report collectors spawned for their apps; the tracker stamps
//! unstamped entries with this server incarnation's epoch and a
//! monotonically increasing version, then installs each one into the app
//! registry only when it supersedes the stored entry.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use roost_common::types::ApplicationId;

use crate::ports::AppRegistry;
use crate::records::AppCollectorData;

pub struct TimelineCollectors {
    cluster_epoch: u64,
    version: AtomicU64,
}

impl TimelineCollectors {
    pub fn new(cluster_epoch: u64) -> Self {
        Self {
            cluster_epoch,
            version: AtomicU64::new(0),
        }
    }

    /// Process the collectors registering through one heartbeat.
    pub fn process_registrations(
        &self,
        registering: &BTreeMap<ApplicationId, AppCollectorData>,
        apps: &dyn AppRegistry,
    ) {
        for (app, data) in registering {
            let mut data = data.clone();
            if !data.is_stamped() {
                data.rm_identifier = self.cluster_epoch;
                data.version = self.version.fetch_add(1, Ordering::SeqCst);
            }
            if !apps.contains_app(app) {
                tracing::warn!(app = %app, "cannot update collector info, application unknown");
                continue;
            }
            let updated = apps.update_collector_if(app, data.clone(), &|prev, next| {
                AppCollectorData::happens_before(prev, next)
            });
            if updated {
                tracing::info!(
                    app = %app,
                    addr = %data.addr,
                    rm_identifier = data.rm_identifier,
                    version = data.version,
                    "updated collector information"
                );
            }
        }
    }

    /// Collector map returned to the agent: one entry per running app whose
    /// collector has registered.
    pub fn collectors_for(
        &self,
        running_apps: impl IntoIterator<Item = ApplicationId>,
        apps: &dyn AppRegistry,
    ) -> BTreeMap<ApplicationId, AppCollectorData> {
        let mut live = BTreeMap::new();
        for app in running_apps {
            match apps.collector_data(&app) {
                Some(data) => {
                    live.insert(app, data);
                }
                None => tracing::debug!(app = %app, "collector has not registered yet"),
            }
        }
        live
    }
}

use serde::{Deserialize, Serialize};

/// Compile-time default heartbeat interval in milliseconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 1000;
/// Compile-time default pacing factors.
pub const DEFAULT_SPEEDUP_FACTOR: f64 = 1.0;
pub const DEFAULT_SLOWDOWN_FACTOR: f64 = 1.0;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoostConfig {
    #[serde(default)]
    pub tracker: TrackerConfig,
}

/// Node tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Tracker RPC bind address.
    pub bind_addr: String,
    /// RPC worker thread count.
    pub client_threads: usize,
    /// Minimum memory (MiB) a node must offer to be admitted.
    pub min_alloc_mb: u64,
    /// Minimum vcores a node must offer to be admitted.
    pub min_alloc_vcores: u32,
    /// Minimum node agent version. `"NONE"` disables the check;
    /// `"EqualToRM"` resolves to this server's own version.
    pub min_version: String,
    /// Reject registrations whose declared host does not resolve while the
    /// remote peer address is known.
    pub check_host_resolution: bool,
    /// Timeline service v2: accept and return per-app collector info.
    pub timeline_v2_enabled: bool,
    /// Where node labels are authored.
    pub label_mode: LabelMode,
    /// When disabled, completed AM master containers reported at
    /// registration produce synthetic container-finished events.
    pub work_preserving_recovery: bool,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub decommission: DecommissionConfig,
    /// Per-node capacity overrides applied at startup; replaceable at
    /// runtime through the admin update verb.
    #[serde(default)]
    pub dynamic_resources: Vec<DynamicResourceSeed>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8031".to_string(),
            client_threads: 50,
            min_alloc_mb: 1024,
            min_alloc_vcores: 1,
            min_version: "NONE".to_string(),
            check_host_resolution: false,
            timeline_v2_enabled: false,
            label_mode: LabelMode::Centralized,
            work_preserving_recovery: true,
            pacing: PacingConfig::default(),
            liveness: LivenessConfig::default(),
            decommission: DecommissionConfig::default(),
            dynamic_resources: Vec::new(),
        }
    }
}

/// Node label configuration mode. Distributed and delegated-centralized are
/// mutually exclusive by construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LabelMode {
    /// Labels are managed centrally; heartbeat reports are ignored.
    #[default]
    Centralized,
    /// Labels in agent reports are authoritative.
    Distributed,
    /// A delegated updater refreshes labels per node; no direct write.
    DelegatedCentralized,
}

/// Heartbeat pacing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Default interval handed to agents when scaling is off.
    pub interval_ms: u64,
    /// Scale the interval per node from heartbeat signals.
    pub scaling_enabled: bool,
    pub min_ms: u64,
    pub max_ms: u64,
    pub speedup_factor: f64,
    pub slowdown_factor: f64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            scaling_enabled: false,
            min_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            max_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            speedup_factor: DEFAULT_SPEEDUP_FACTOR,
            slowdown_factor: DEFAULT_SLOWDOWN_FACTOR,
        }
    }
}

impl PacingConfig {
    /// Validate and repair the configuration. Invalid values fall back to
    /// defaults with a warning instead of failing the load.
    pub fn normalized(mut self) -> Self {
        if self.interval_ms == 0 {
            tracing::warn!(
                interval_ms = self.interval_ms,
                "heartbeat interval must be greater than 0, using default"
            );
            self.interval_ms = DEFAULT_HEARTBEAT_INTERVAL_MS;
        }
        if self.scaling_enabled {
            if self.min_ms == 0
                || self.min_ms > self.max_ms
                || self.interval_ms < self.min_ms
                || self.interval_ms > self.max_ms
            {
                tracing::warn!(
                    min_ms = self.min_ms,
                    interval_ms = self.interval_ms,
                    max_ms = self.max_ms,
                    "invalid heartbeat pacing bounds, required 0 < min <= interval <= max; \
                     collapsing min and max to the configured interval"
                );
                self.min_ms = self.interval_ms;
                self.max_ms = self.interval_ms;
            }
            if self.speedup_factor < 0.0 || self.slowdown_factor < 0.0 {
                tracing::warn!(
                    speedup = self.speedup_factor,
                    slowdown = self.slowdown_factor,
                    "heartbeat scaling factors must be >= 0, using defaults"
                );
                self.speedup_factor = DEFAULT_SPEEDUP_FACTOR;
                self.slowdown_factor = DEFAULT_SLOWDOWN_FACTOR;
            }
            tracing::info!(
                interval_ms = self.interval_ms,
                min_ms = self.min_ms,
                max_ms = self.max_ms,
                speedup = self.speedup_factor,
                slowdown = self.slowdown_factor,
                "heartbeat pacing enabled"
            );
        }
        self
    }
}

/// Liveness monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// A node missing pings for this long is expired.
    pub expiry_interval_ms: u64,
    /// How often the background scan runs.
    pub scan_interval_ms: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            expiry_interval_ms: 600_000,
            scan_interval_ms: 1_000,
        }
    }
}

/// Decommission drain configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecommissionConfig {
    pub drain_policy: DrainPolicy,
}

/// What must drain before a DECOMMISSIONING node is considered done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DrainPolicy {
    /// Done once no containers are running.
    #[default]
    Containers,
    /// Done once no containers are running and no tracked apps remain.
    ContainersAndApps,
}

/// One startup entry of the dynamic resource table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicResourceSeed {
    pub host: String,
    pub port: u16,
    pub memory_mb: u64,
    pub vcores: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pacing_is_stable_under_normalization() {
        let cfg = PacingConfig::default().normalized();
        assert_eq!(cfg.interval_ms, DEFAULT_HEARTBEAT_INTERVAL_MS);
        assert_eq!(cfg.min_ms, DEFAULT_HEARTBEAT_INTERVAL_MS);
        assert_eq!(cfg.max_ms, DEFAULT_HEARTBEAT_INTERVAL_MS);
    }

    #[test]
    fn test_zero_interval_falls_back_to_default() {
        let cfg = PacingConfig {
            interval_ms: 0,
            ..PacingConfig::default()
        }
        .normalized();
        assert_eq!(cfg.interval_ms, DEFAULT_HEARTBEAT_INTERVAL_MS);
    }

    #[test]
    fn test_inverted_bounds_collapse_to_interval() {
        let cfg = PacingConfig {
            interval_ms: 1000,
            scaling_enabled: true,
            min_ms: 2000,
            max_ms: 500,
            ..PacingConfig::default()
        }
        .normalized();
        assert_eq!(cfg.min_ms, 1000);
        assert_eq!(cfg.max_ms, 1000);
    }

    #[test]
    fn test_interval_outside_bounds_collapses() {
        let cfg = PacingConfig {
            interval_ms: 5000,
            scaling_enabled: true,
            min_ms: 100,
            max_ms: 2000,
            ..PacingConfig::default()
        }
        .normalized();
        assert_eq!(cfg.min_ms, 5000);
        assert_eq!(cfg.max_ms, 5000);
    }

    #[test]
    fn test_negative_factors_reset_to_defaults() {
        let cfg = PacingConfig {
            interval_ms: 1000,
            scaling_enabled: true,
            min_ms: 500,
            max_ms: 2000,
            speedup_factor: -1.0,
            slowdown_factor: 3.0,
        }
        .normalized();
        assert_eq!(cfg.speedup_factor, DEFAULT_SPEEDUP_FACTOR);
        assert_eq!(cfg.slowdown_factor, DEFAULT_SLOWDOWN_FACTOR);
    }

    #[test]
    fn test_bounds_ignored_when_scaling_disabled() {
        let cfg = PacingConfig {
            interval_ms: 1000,
            scaling_enabled: false,
            min_ms: 9999,
            max_ms: 1,
            ..PacingConfig::default()
        }
        .normalized();
        // Left untouched: only the default interval is ever handed out.
        assert_eq!(cfg.min_ms, 9999);
        assert_eq!(cfg.max_ms, 1);
    }

    #[test]
    fn test_tracker_config_defaults() {
        let cfg = TrackerConfig::default();
        assert_eq!(cfg.min_version, "NONE");
        assert_eq!(cfg.label_mode, LabelMode::Centralized);
        assert!(cfg.work_preserving_recovery);
        assert!(cfg.dynamic_resources.is_empty());
    }
}

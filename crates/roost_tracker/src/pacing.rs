//! Per-node heartbeat interval selection.
//!
//! Agents heartbeat on whatever interval the previous response told them
//! to. With scaling disabled every node gets the configured default. With
//! scaling enabled the interval shrinks for nodes with pending container
//! updates and grows for idle ones, always bounded to `[min, max]`.

use roost_common::config::PacingConfig;

/// Pure interval selection. `signal` is the number of container updates
/// the node's most recent status report carried.
pub fn next_heartbeat_interval(config: &PacingConfig, signal: usize) -> u64 {
    if !config.scaling_enabled {
        return config.interval_ms;
    }
    let base = config.interval_ms as f64;
    let scaled = if signal > 0 {
        base / (1.0 + config.speedup_factor * signal as f64)
    } else {
        base * (1.0 + config.slowdown_factor)
    };
    (scaled as u64).clamp(config.min_ms, config.max_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaling_config() -> PacingConfig {
        PacingConfig {
            interval_ms: 1000,
            scaling_enabled: true,
            min_ms: 100,
            max_ms: 4000,
            speedup_factor: 1.0,
            slowdown_factor: 1.0,
        }
    }

    #[test]
    fn test_disabled_scaling_returns_default() {
        let config = PacingConfig {
            scaling_enabled: false,
            ..scaling_config()
        };
        assert_eq!(next_heartbeat_interval(&config, 0), 1000);
        assert_eq!(next_heartbeat_interval(&config, 100), 1000);
    }

    #[test]
    fn test_busy_node_speeds_up() {
        let config = scaling_config();
        let idle = next_heartbeat_interval(&config, 0);
        let busy = next_heartbeat_interval(&config, 4);
        assert!(busy < config.interval_ms);
        assert!(busy < idle);
        assert_eq!(busy, 200); // 1000 / (1 + 1.0 * 4)
    }

    #[test]
    fn test_idle_node_slows_down() {
        let config = scaling_config();
        assert_eq!(next_heartbeat_interval(&config, 0), 2000); // 1000 * (1 + 1.0)
    }

    #[test]
    fn test_interval_clamped_to_min() {
        let config = scaling_config();
        assert_eq!(next_heartbeat_interval(&config, 1000), config.min_ms);
    }

    #[test]
    fn test_interval_clamped_to_max() {
        let config = PacingConfig {
            slowdown_factor: 100.0,
            ..scaling_config()
        };
        assert_eq!(next_heartbeat_interval(&config, 0), config.max_ms);
    }

    #[test]
    fn test_zero_factors_hold_interval_steady() {
        let config = PacingConfig {
            speedup_factor: 0.0,
            slowdown_factor: 0.0,
            ..scaling_config()
        };
        assert_eq!(next_heartbeat_interval(&config, 0), 1000);
        assert_eq!(next_heartbeat_interval(&config, 50), 1000);
    }
}

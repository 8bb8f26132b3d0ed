//! Admission policy: stateless checks run at registration (and partially
//! re-run on every heartbeat). First failure wins; each failure carries the
//! diagnostic that goes back to the agent with the SHUTDOWN directive.

use std::cmp::Ordering;
use std::net::IpAddr;

use roost_common::types::{compare_versions, Resource};

use crate::ports::HostResolver;

/// Sentinel disabling the version floor entirely.
pub const VERSION_FLOOR_NONE: &str = "NONE";
/// Sentinel pinning the floor to this server's own version.
pub const VERSION_FLOOR_EQUAL_TO_RM: &str = "EqualToRM";

/// Version floor: the agent's reported version must not compare below the
/// configured minimum.
pub fn check_version_floor(
    min_version: &str,
    server_version: &str,
    agent_version: &str,
) -> Result<(), String> {
    if min_version == VERSION_FLOOR_NONE {
        return Ok(());
    }
    let floor = if min_version == VERSION_FLOOR_EQUAL_TO_RM {
        server_version
    } else {
        min_version
    };
    if agent_version.is_empty() || compare_versions(agent_version, floor) == Ordering::Less {
        return Err(format!(
            "disallowed node agent version {agent_version}, less than the minimum version {floor}"
        ));
    }
    Ok(())
}

/// Host resolution: reject agents whose declared host does not resolve
/// while the remote peer address is known. Prevents the scheduler from
/// stalling allocations on an unreachable hostname.
pub fn check_host_resolution(
    enabled: bool,
    resolver: &dyn HostResolver,
    host: &str,
    remote_ip: Option<IpAddr>,
) -> Result<(), String> {
    if !enabled {
        return Ok(());
    }
    if let Some(ip) = remote_ip {
        if resolver.resolve_host(host).is_none() {
            return Err(format!("hostname cannot be resolved (ip={ip}, hostname={host})"));
        }
    }
    Ok(())
}

/// Include/exclude list membership. `in_decommissioning` lets a draining
/// node keep reporting even after its host was excluded.
pub fn check_admission_list(
    host_valid: bool,
    in_decommissioning: bool,
    host: &str,
) -> Result<(), String> {
    if !host_valid && !in_decommissioning {
        return Err(format!("disallowed node agent from {host}"));
    }
    Ok(())
}

/// Minimum allocation floor against the (possibly overridden) capability.
pub fn check_min_allocation(
    capability: &Resource,
    min_alloc_mb: u64,
    min_alloc_vcores: u32,
    host: &str,
) -> Result<(), String> {
    if capability.memory_mb < min_alloc_mb || capability.vcores < min_alloc_vcores {
        return Err(format!(
            "node agent from {host} does not satisfy minimum allocations; \
             capability is {capability}, minimums are {min_alloc_mb}MiB and {min_alloc_vcores} vcores"
        ));
    }
    Ok(())
}

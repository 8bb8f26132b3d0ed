//! Per-node capacity overrides, reloadable at runtime.
//!
//! The table is a copy-on-write snapshot: admins build a whole new table
//! and swap it in under the tracker's write guard; handlers only ever do
//! read-only lookups against the current snapshot.

use std::collections::HashMap;

use roost_common::config::DynamicResourceSeed;
use roost_common::types::{NodeId, Resource};

#[derive(Debug, Clone, Default)]
pub struct DynamicResourceTable {
    overrides: HashMap<NodeId, Resource>,
}

impl DynamicResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the startup table from configuration entries.
    pub fn from_seeds(seeds: &[DynamicResourceSeed]) -> Self {
        let overrides = seeds
            .iter()
            .map(|s| {
                (
                    NodeId::new(s.host.clone(), s.port),
                    Resource::new(s.memory_mb, s.vcores),
                )
            })
            .collect();
        Self { overrides }
    }

    pub fn insert(&mut self, node_id: NodeId, resource: Resource) {
        self.overrides.insert(node_id, resource);
    }

    /// The override for a node, if any.
    pub fn lookup(&self, node_id: &NodeId) -> Option<&Resource> {
        self.overrides.get(node_id)
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_table_has_no_overrides() {
        let table = DynamicResourceTable::new();
        assert!(table.lookup(&NodeId::new("h1", 8041)).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_lookup_returns_override() {
        let mut table = DynamicResourceTable::new();
        table.insert(NodeId::new("h1", 8041), Resource::new(16384, 8));
        let found = table.lookup(&NodeId::new("h1", 8041)).unwrap();
        assert_eq!(found.memory_mb, 16384);
        assert_eq!(found.vcores, 8);
        assert!(table.lookup(&NodeId::new("h2", 8041)).is_none());
    }

    #[test]
    fn test_from_seeds() {
        let table = DynamicResourceTable::from_seeds(&[
            DynamicResourceSeed {
                host: "h1".into(),
                port: 8041,
                memory_mb: 4096,
                vcores: 2,
            },
            DynamicResourceSeed {
                host: "h2".into(),
                port: 8041,
                memory_mb: 8192,
                vcores: 4,
            },
        ]);
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.lookup(&NodeId::new("h2", 8041)).unwrap().memory_mb,
            8192
        );
    }
}

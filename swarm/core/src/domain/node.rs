// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Hierarchy Node Aggregate
//!
//! Entries in the coordinator tree: one ROOT, domain coordinators beneath it,
//! and leaf workers. The authoritative structure is the parent→children
//! adjacency carried on each node; the child→parent field is a plain id
//! back-reference with no ownership semantics.
//!
//! # Invariants
//!
//! - Exactly one node of kind [`NodeKind::Root`] exists per hierarchy.
//! - Every non-root node has exactly one parent present in the node table.
//! - The parent/child relation is acyclic (a tree, not a general graph).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::task::TaskDomain;

/// Unique identifier for a [`HierarchyNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Generate a new random `NodeId`.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Position of a node in the coordinator tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// The single top-level coordinator.
    Root,
    /// Mid-tier domain coordinator.
    Coordinator,
    /// Leaf execution node.
    Worker,
}

/// Health status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    Active,
    /// Stale activity; still routable for reads but excluded from assignment.
    Degraded,
    Failed,
    Inactive,
}

/// One entry in the coordinator tree.
///
/// Load and capacity are abstract work units; `load` is always clamped into
/// `[0, capacity]` by the topology service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub domain: TaskDomain,
    /// Back-reference only; the parent's `children` list is authoritative.
    pub parent: Option<NodeId>,
    /// Ordered child ids (insertion order).
    pub children: Vec<NodeId>,
    pub status: NodeStatus,
    pub capabilities: BTreeSet<String>,
    pub load: f64,
    pub capacity: f64,
    pub last_activity: DateTime<Utc>,
}

impl HierarchyNode {
    pub fn new(
        kind: NodeKind,
        domain: TaskDomain,
        parent: Option<NodeId>,
        capacity: f64,
        capabilities: BTreeSet<String>,
    ) -> Self {
        Self {
            id: NodeId::new(),
            kind,
            domain,
            parent,
            children: Vec::new(),
            status: NodeStatus::Active,
            capabilities,
            load: 0.0,
            capacity,
            last_activity: Utc::now(),
        }
    }

    /// Load as a fraction of capacity, `0.0` for zero-capacity nodes.
    pub fn utilization(&self) -> f64 {
        if self.capacity <= 0.0 {
            0.0
        } else {
            self.load / self.capacity
        }
    }

    pub fn spare_capacity(&self) -> f64 {
        (self.capacity - self.load).max(0.0)
    }

    /// Whether the node can accept new work.
    pub fn is_available(&self) -> bool {
        self.status == NodeStatus::Active && self.spare_capacity() > 0.0
    }

    /// True when the node shares at least one capability with `required`
    /// (an empty requirement set matches every node).
    pub fn matches_capabilities(&self, required: &BTreeSet<String>) -> bool {
        required.is_empty() || required.iter().any(|c| self.capabilities.contains(c))
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }
}

/// Structural errors raised by hierarchy mutations. Fatal, never retried.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("invalid hierarchy: {0}")]
    InvalidHierarchy(String),

    #[error("node {0} has live dependents and cannot be removed")]
    NodeHasDependents(NodeId),

    #[error("node not found: {0}")]
    NodeNotFound(NodeId),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_utilization_zero_capacity() {
        let node = HierarchyNode::new(NodeKind::Worker, TaskDomain::Generic, None, 0.0, caps(&[]));
        assert_eq!(node.utilization(), 0.0);
        assert!(!node.is_available());
    }

    #[test]
    fn test_capability_overlap() {
        let node = HierarchyNode::new(
            NodeKind::Worker,
            TaskDomain::Development,
            None,
            10.0,
            caps(&["coding", "testing"]),
        );
        assert!(node.matches_capabilities(&caps(&["testing"])));
        assert!(node.matches_capabilities(&caps(&[])));
        assert!(!node.matches_capabilities(&caps(&["deployment"])));
    }

    #[test]
    fn test_spare_capacity_never_negative() {
        let mut node =
            HierarchyNode::new(NodeKind::Worker, TaskDomain::Generic, None, 5.0, caps(&[]));
        node.load = 7.0;
        assert_eq!(node.spare_capacity(), 0.0);
    }
}

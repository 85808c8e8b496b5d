// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Hierarchy Topology Service
//!
//! Owns the coordinator tree: root → domain coordinators → workers. Performs
//! load-aware routing (`find_optimal_node`), failure-driven load
//! redistribution across siblings, and periodic staleness checks.
//!
//! The node table is mutated only here; every read handed out is a snapshot
//! copy.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use aegis_swarm_core::domain::config::{SelectionStrategy, TopologyConfig};
use aegis_swarm_core::domain::events::TopologyEvent;
use aegis_swarm_core::domain::node::{
    HierarchyNode, NodeId, NodeKind, NodeStatus, TopologyError,
};
use aegis_swarm_core::domain::repository::NodeRepository;
use aegis_swarm_core::domain::task::TaskDomain;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// Outcome of failing a node: either its load moved to siblings, or there
/// were none and the load was dropped (an alert condition for the caller).
#[derive(Debug, Clone, PartialEq)]
pub enum RedistributionOutcome {
    Redistributed {
        siblings: Vec<NodeId>,
        per_sibling: f64,
    },
    /// No ACTIVE siblings existed; the load could not be placed anywhere.
    Dropped { load: f64 },
}

pub struct HierarchyTopology {
    nodes: Arc<dyn NodeRepository>,
    events: crate::infrastructure::EventBus,
    config: TopologyConfig,
    rr_cursor: AtomicUsize,
}

impl HierarchyTopology {
    pub fn new(
        nodes: Arc<dyn NodeRepository>,
        events: crate::infrastructure::EventBus,
        config: TopologyConfig,
    ) -> Self {
        Self {
            nodes,
            events,
            config,
            rr_cursor: AtomicUsize::new(0),
        }
    }

    /// Add a node to the tree.
    ///
    /// # Errors
    ///
    /// `InvalidHierarchy` if a second ROOT is added, a non-root node has no
    /// parent, or the declared parent does not exist.
    pub fn add_node(
        &self,
        kind: NodeKind,
        domain: TaskDomain,
        parent: Option<NodeId>,
        capacity: f64,
        capabilities: BTreeSet<String>,
    ) -> Result<NodeId, TopologyError> {
        match (kind, parent) {
            (NodeKind::Root, Some(_)) => {
                return Err(TopologyError::InvalidHierarchy(
                    "root node cannot have a parent".to_string(),
                ));
            }
            (NodeKind::Root, None) => {
                if self.nodes.list().iter().any(|n| n.kind == NodeKind::Root) {
                    return Err(TopologyError::InvalidHierarchy(
                        "hierarchy already has a root".to_string(),
                    ));
                }
            }
            (_, None) => {
                return Err(TopologyError::InvalidHierarchy(
                    "non-root node requires a parent".to_string(),
                ));
            }
            (_, Some(parent_id)) => {
                if self.nodes.get(parent_id).is_none() {
                    return Err(TopologyError::InvalidHierarchy(format!(
                        "parent {parent_id} does not exist"
                    )));
                }
            }
        }

        let node = HierarchyNode::new(kind, domain, parent, capacity, capabilities);
        let id = node.id;
        self.nodes.insert(node);

        if let Some(parent_id) = parent {
            // Parent existence was checked above; the update cannot miss.
            let _ = self.nodes.update(parent_id, &mut |p| {
                if !p.children.contains(&id) {
                    p.children.push(id);
                }
            });
        }

        info!(node = %id, ?kind, %domain, "node added to hierarchy");
        self.events.publish_topology_event(TopologyEvent::NodeAdded {
            node_id: id,
            kind,
            domain,
            parent,
            added_at: Utc::now(),
        });
        metrics::gauge!("aegis_swarm_hierarchy_nodes").set(self.nodes.count() as f64);
        Ok(id)
    }

    /// Remove a node, reattaching its children to the grandparent. Children
    /// with no grandparent are orphaned with a warning rather than deleted.
    pub fn remove_node(&self, id: NodeId) -> Result<(), TopologyError> {
        let node = self.nodes.get(id).ok_or(TopologyError::NodeNotFound(id))?;

        if node.kind == NodeKind::Root && !node.children.is_empty() {
            return Err(TopologyError::NodeHasDependents(id));
        }

        let grandparent = node.parent;
        let mut reattached = 0usize;
        for child in &node.children {
            match grandparent {
                Some(gp) => {
                    let _ = self.nodes.update(*child, &mut |c| c.parent = Some(gp));
                    let _ = self.nodes.update(gp, &mut |g| {
                        if !g.children.contains(child) {
                            g.children.push(*child);
                        }
                    });
                    reattached += 1;
                }
                None => {
                    let _ = self.nodes.update(*child, &mut |c| c.parent = None);
                    warn!(child = %child, removed = %id, "child orphaned: removed node has no parent");
                }
            }
        }

        if let Some(parent_id) = node.parent {
            let _ = self
                .nodes
                .update(parent_id, &mut |p| p.children.retain(|c| *c != id));
        }

        self.nodes.remove(id);
        info!(node = %id, reattached, "node removed from hierarchy");
        self.events
            .publish_topology_event(TopologyEvent::NodeRemoved {
                node_id: id,
                reattached_children: reattached,
                removed_at: Utc::now(),
            });
        metrics::gauge!("aegis_swarm_hierarchy_nodes").set(self.nodes.count() as f64);
        Ok(())
    }

    /// Apply a load delta, clamped into `[0, capacity]`. Crossing the
    /// rebalance threshold sheds the excess to the least-loaded ACTIVE
    /// sibling.
    pub fn update_node_load(&self, id: NodeId, delta: f64) -> Result<f64, TopologyError> {
        let mut new_load = 0.0;
        let mut capacity = 0.0;
        self.nodes
            .update(id, &mut |n| {
                n.load = (n.load + delta).clamp(0.0, n.capacity);
                n.touch(Utc::now());
                new_load = n.load;
                capacity = n.capacity;
            })
            .map_err(|_| TopologyError::NodeNotFound(id))?;

        self.events
            .publish_topology_event(TopologyEvent::NodeLoadChanged {
                node_id: id,
                load: new_load,
                capacity,
                changed_at: Utc::now(),
            });

        if capacity > 0.0 && new_load / capacity > self.config.rebalance_threshold {
            self.shed_excess_load(id, new_load, capacity);
        }
        Ok(new_load)
    }

    /// Move the load above the rebalance threshold to the least-loaded ACTIVE
    /// sibling, if one has spare capacity.
    fn shed_excess_load(&self, id: NodeId, load: f64, capacity: f64) {
        let excess = load - self.config.rebalance_threshold * capacity;
        let Some(sibling) = self
            .siblings_of(id)
            .into_iter()
            .filter(|s| s.status == NodeStatus::Active && s.spare_capacity() > 0.0)
            .min_by(|a, b| a.load.total_cmp(&b.load))
        else {
            debug!(node = %id, excess, "overloaded node has no sibling with spare capacity");
            return;
        };

        let moved = excess.min(sibling.spare_capacity());
        let _ = self.nodes.update(id, &mut |n| n.load -= moved);
        let _ = self.nodes.update(sibling.id, &mut |n| n.load += moved);
        info!(from = %id, to = %sibling.id, moved, "rebalanced excess load to sibling");
    }

    /// Select the best ACTIVE node with spare capacity and a capability
    /// overlap, per the configured strategy. Ties break toward
    /// `preferred_domain`.
    pub fn find_optimal_node(
        &self,
        required: &BTreeSet<String>,
        preferred_domain: Option<TaskDomain>,
    ) -> Option<HierarchyNode> {
        let mut candidates: Vec<HierarchyNode> = self
            .nodes
            .list()
            .into_iter()
            .filter(|n| n.is_available() && n.matches_capabilities(required))
            .collect();
        if candidates.is_empty() {
            return None;
        }
        // Deterministic candidate order regardless of table iteration.
        candidates.sort_by_key(|n| n.id);

        match self.config.selection {
            SelectionStrategy::RoundRobin => {
                let idx = self.rr_cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
                Some(candidates.swap_remove(idx))
            }
            SelectionStrategy::Weighted => Self::pick_best(candidates, preferred_domain, |n| {
                if n.capacity > 0.0 {
                    n.spare_capacity() / n.capacity
                } else {
                    0.0
                }
            }),
            SelectionStrategy::LeastLoaded => {
                Self::pick_best(candidates, preferred_domain, |n| -n.load)
            }
        }
    }

    /// Highest score wins; on equal scores a preferred-domain match wins.
    fn pick_best(
        candidates: Vec<HierarchyNode>,
        preferred_domain: Option<TaskDomain>,
        score: impl Fn(&HierarchyNode) -> f64,
    ) -> Option<HierarchyNode> {
        let mut best: Option<(f64, HierarchyNode)> = None;
        for node in candidates {
            let s = score(&node);
            match &best {
                None => best = Some((s, node)),
                Some((best_s, best_n)) => {
                    let domain_tiebreak = (s - best_s).abs() < f64::EPSILON
                        && preferred_domain == Some(node.domain)
                        && preferred_domain != Some(best_n.domain);
                    if s > *best_s || domain_tiebreak {
                        best = Some((s, node));
                    }
                }
            }
        }
        best.map(|(_, n)| n)
    }

    /// Transition a node to FAILED and redistribute its load evenly across
    /// ACTIVE siblings under the same parent. With no siblings the load is
    /// dropped and the caller must raise an alert.
    pub fn mark_node_failed(&self, id: NodeId) -> Result<RedistributionOutcome, TopologyError> {
        let node = self.nodes.get(id).ok_or(TopologyError::NodeNotFound(id))?;
        let previous_status = node.status;
        let load = node.load;

        self.nodes
            .update(id, &mut |n| {
                n.status = NodeStatus::Failed;
                n.load = 0.0;
            })
            .map_err(|_| TopologyError::NodeNotFound(id))?;

        self.events
            .publish_topology_event(TopologyEvent::NodeStatusChanged {
                node_id: id,
                from: previous_status,
                to: NodeStatus::Failed,
                changed_at: Utc::now(),
            });

        let siblings: Vec<NodeId> = self
            .siblings_of(id)
            .into_iter()
            .filter(|s| s.status == NodeStatus::Active)
            .map(|s| s.id)
            .collect();

        if load <= 0.0 {
            return Ok(RedistributionOutcome::Redistributed {
                siblings,
                per_sibling: 0.0,
            });
        }

        if siblings.is_empty() {
            warn!(node = %id, load, "failed node has no active siblings; load dropped");
            return Ok(RedistributionOutcome::Dropped { load });
        }

        let per_sibling = load / siblings.len() as f64;
        for sibling in &siblings {
            let _ = self.nodes.update(*sibling, &mut |n| {
                n.load = (n.load + per_sibling).clamp(0.0, n.capacity);
            });
        }

        info!(node = %id, load, count = siblings.len(), "redistributed load from failed node");
        self.events
            .publish_topology_event(TopologyEvent::LoadRedistributed {
                failed_node: id,
                siblings: siblings.clone(),
                per_sibling,
                redistributed_at: Utc::now(),
            });

        Ok(RedistributionOutcome::Redistributed {
            siblings,
            per_sibling,
        })
    }

    /// Periodic staleness check. A node whose activity is older than 3× the
    /// check interval degrades; a degraded node stale past 6× is escalated to
    /// FAILED (sustained unresponsiveness).
    pub fn health_check_tick(&self, now: DateTime<Utc>) -> usize {
        let degrade_after = 3 * self.config.health_check_interval_ms as i64;
        let fail_after = 6 * self.config.health_check_interval_ms as i64;
        let mut transitions = 0usize;

        for node in self.nodes.list() {
            let stale_ms = (now - node.last_activity).num_milliseconds();
            match node.status {
                NodeStatus::Active if stale_ms > degrade_after => {
                    let _ = self
                        .nodes
                        .update(node.id, &mut |n| n.status = NodeStatus::Degraded);
                    warn!(node = %node.id, stale_ms, "node degraded: stale activity");
                    self.events
                        .publish_topology_event(TopologyEvent::NodeStatusChanged {
                            node_id: node.id,
                            from: NodeStatus::Active,
                            to: NodeStatus::Degraded,
                            changed_at: now,
                        });
                    transitions += 1;
                }
                NodeStatus::Degraded if stale_ms > fail_after => {
                    let _ = self.mark_node_failed(node.id);
                    transitions += 1;
                }
                _ => {}
            }
        }
        transitions
    }

    /// `1 − stddev(loads)/mean(loads)` over ACTIVE nodes, clamped to `[0,1]`.
    pub fn balance_score(&self) -> f64 {
        let loads: Vec<f64> = self
            .nodes
            .list()
            .into_iter()
            .filter(|n| n.status == NodeStatus::Active)
            .map(|n| n.load)
            .collect();
        if loads.len() < 2 {
            return 1.0;
        }
        let mean = loads.iter().sum::<f64>() / loads.len() as f64;
        if mean <= 0.0 {
            return 1.0;
        }
        let variance =
            loads.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / loads.len() as f64;
        (1.0 - variance.sqrt() / mean).clamp(0.0, 1.0)
    }

    /// Snapshot copy of the whole node table.
    pub fn snapshot(&self) -> Vec<HierarchyNode> {
        self.nodes.list()
    }

    pub fn node(&self, id: NodeId) -> Option<HierarchyNode> {
        self.nodes.get(id)
    }

    /// Grant a capability to a node; returns whether it was newly added.
    pub fn grant_capability(&self, id: NodeId, capability: &str) -> Result<bool, TopologyError> {
        let mut added = false;
        self.nodes
            .update(id, &mut |n| {
                added = n.capabilities.insert(capability.to_string());
            })
            .map_err(|_| TopologyError::NodeNotFound(id))?;
        Ok(added)
    }

    pub fn revoke_capability(&self, id: NodeId, capability: &str) -> Result<(), TopologyError> {
        self.nodes
            .update(id, &mut |n| {
                n.capabilities.remove(capability);
            })
            .map_err(|_| TopologyError::NodeNotFound(id))
    }

    /// Record external activity for a node (telemetry heartbeat).
    pub fn record_activity(&self, id: NodeId, now: DateTime<Utc>) -> Result<(), TopologyError> {
        self.nodes
            .update(id, &mut |n| n.touch(now))
            .map_err(|_| TopologyError::NodeNotFound(id))
    }

    fn siblings_of(&self, id: NodeId) -> Vec<HierarchyNode> {
        let Some(node) = self.nodes.get(id) else {
            return Vec::new();
        };
        let Some(parent_id) = node.parent else {
            return Vec::new();
        };
        let Some(parent) = self.nodes.get(parent_id) else {
            return Vec::new();
        };
        parent
            .children
            .iter()
            .filter(|c| **c != id)
            .filter_map(|c| self.nodes.get(*c))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{EventBus, InMemoryNodeRepository};

    fn caps(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn topology(selection: SelectionStrategy) -> HierarchyTopology {
        let config = TopologyConfig {
            selection,
            ..TopologyConfig::default()
        };
        HierarchyTopology::new(
            Arc::new(InMemoryNodeRepository::new()),
            EventBus::new(64),
            config,
        )
    }

    fn seed_root(t: &HierarchyTopology) -> NodeId {
        t.add_node(NodeKind::Root, TaskDomain::Generic, None, 100.0, caps(&[]))
            .unwrap()
    }

    #[test]
    fn test_second_root_rejected() {
        let t = topology(SelectionStrategy::LeastLoaded);
        seed_root(&t);
        let err = t.add_node(NodeKind::Root, TaskDomain::Generic, None, 100.0, caps(&[]));
        assert!(matches!(err, Err(TopologyError::InvalidHierarchy(_))));
    }

    #[test]
    fn test_missing_parent_rejected() {
        let t = topology(SelectionStrategy::LeastLoaded);
        seed_root(&t);
        let err = t.add_node(
            NodeKind::Worker,
            TaskDomain::Generic,
            Some(NodeId::new()),
            10.0,
            caps(&[]),
        );
        assert!(matches!(err, Err(TopologyError::InvalidHierarchy(_))));
    }

    #[test]
    fn test_remove_reattaches_children_to_grandparent() {
        let t = topology(SelectionStrategy::LeastLoaded);
        let root = seed_root(&t);
        let mid = t
            .add_node(
                NodeKind::Coordinator,
                TaskDomain::Development,
                Some(root),
                50.0,
                caps(&[]),
            )
            .unwrap();
        let leaf = t
            .add_node(
                NodeKind::Worker,
                TaskDomain::Development,
                Some(mid),
                10.0,
                caps(&[]),
            )
            .unwrap();

        t.remove_node(mid).unwrap();

        let leaf_node = t.node(leaf).unwrap();
        assert_eq!(leaf_node.parent, Some(root));
        assert!(t.node(root).unwrap().children.contains(&leaf));
        assert!(t.node(mid).is_none());
    }

    #[test]
    fn test_remove_root_with_children_rejected() {
        let t = topology(SelectionStrategy::LeastLoaded);
        let root = seed_root(&t);
        t.add_node(
            NodeKind::Coordinator,
            TaskDomain::Quality,
            Some(root),
            10.0,
            caps(&[]),
        )
        .unwrap();
        assert!(matches!(
            t.remove_node(root),
            Err(TopologyError::NodeHasDependents(_))
        ));
    }

    #[test]
    fn test_load_clamped_to_capacity() {
        let t = topology(SelectionStrategy::LeastLoaded);
        let root = seed_root(&t);
        let worker = t
            .add_node(NodeKind::Worker, TaskDomain::Generic, Some(root), 10.0, caps(&[]))
            .unwrap();

        assert_eq!(t.update_node_load(worker, 25.0).unwrap(), 10.0);
        assert_eq!(t.update_node_load(worker, -99.0).unwrap(), 0.0);
    }

    #[test]
    fn test_find_optimal_least_loaded_with_domain_tiebreak() {
        let t = topology(SelectionStrategy::LeastLoaded);
        let root = seed_root(&t);
        let a = t
            .add_node(
                NodeKind::Worker,
                TaskDomain::Quality,
                Some(root),
                10.0,
                caps(&["testing"]),
            )
            .unwrap();
        let b = t
            .add_node(
                NodeKind::Worker,
                TaskDomain::Development,
                Some(root),
                10.0,
                caps(&["testing"]),
            )
            .unwrap();

        // Equal load: the preferred domain breaks the tie.
        let chosen = t
            .find_optimal_node(&caps(&["testing"]), Some(TaskDomain::Development))
            .unwrap();
        assert_eq!(chosen.id, b);

        // Load the preferred node: least-loaded wins over domain preference.
        t.update_node_load(b, 8.0).unwrap();
        let chosen = t
            .find_optimal_node(&caps(&["testing"]), Some(TaskDomain::Development))
            .unwrap();
        assert_eq!(chosen.id, a);
    }

    #[test]
    fn test_find_optimal_filters_capability_and_status() {
        let t = topology(SelectionStrategy::Weighted);
        let root = seed_root(&t);
        let capable = t
            .add_node(
                NodeKind::Worker,
                TaskDomain::Development,
                Some(root),
                10.0,
                caps(&["coding"]),
            )
            .unwrap();
        let wrong_caps = t
            .add_node(
                NodeKind::Worker,
                TaskDomain::Development,
                Some(root),
                10.0,
                caps(&["writing"]),
            )
            .unwrap();
        t.mark_node_failed(wrong_caps).unwrap();

        let chosen = t.find_optimal_node(&caps(&["coding"]), None).unwrap();
        assert_eq!(chosen.id, capable);
        assert!(t.find_optimal_node(&caps(&["deployment"]), None).is_none());
    }

    #[test]
    fn test_round_robin_rotates() {
        let t = topology(SelectionStrategy::RoundRobin);
        let root = seed_root(&t);
        for _ in 0..3 {
            t.add_node(NodeKind::Worker, TaskDomain::Generic, Some(root), 10.0, caps(&[]))
                .unwrap();
        }
        let first = t.find_optimal_node(&caps(&[]), None).unwrap().id;
        let second = t.find_optimal_node(&caps(&[]), None).unwrap().id;
        assert_ne!(first, second);
    }

    #[test]
    fn test_failed_node_load_redistributed_to_siblings() {
        let t = topology(SelectionStrategy::LeastLoaded);
        let root = seed_root(&t);
        let failed = t
            .add_node(
                NodeKind::Coordinator,
                TaskDomain::Development,
                Some(root),
                200.0,
                caps(&[]),
            )
            .unwrap();
        let s1 = t
            .add_node(
                NodeKind::Coordinator,
                TaskDomain::Quality,
                Some(root),
                200.0,
                caps(&[]),
            )
            .unwrap();
        let s2 = t
            .add_node(
                NodeKind::Coordinator,
                TaskDomain::Research,
                Some(root),
                200.0,
                caps(&[]),
            )
            .unwrap();
        t.update_node_load(failed, 100.0).unwrap();

        let outcome = t.mark_node_failed(failed).unwrap();
        match outcome {
            RedistributionOutcome::Redistributed { per_sibling, .. } => {
                assert_eq!(per_sibling, 50.0);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(t.node(failed).unwrap().load, 0.0);
        assert_eq!(t.node(s1).unwrap().load, 50.0);
        assert_eq!(t.node(s2).unwrap().load, 50.0);
    }

    #[test]
    fn test_failed_node_without_siblings_drops_load() {
        let t = topology(SelectionStrategy::LeastLoaded);
        let root = seed_root(&t);
        let only = t
            .add_node(
                NodeKind::Coordinator,
                TaskDomain::Development,
                Some(root),
                100.0,
                caps(&[]),
            )
            .unwrap();
        t.update_node_load(only, 40.0).unwrap();

        let outcome = t.mark_node_failed(only).unwrap();
        assert_eq!(outcome, RedistributionOutcome::Dropped { load: 40.0 });
    }

    #[test]
    fn test_health_check_degrades_then_fails() {
        let t = topology(SelectionStrategy::LeastLoaded);
        let root = seed_root(&t);
        let worker = t
            .add_node(NodeKind::Worker, TaskDomain::Generic, Some(root), 10.0, caps(&[]))
            .unwrap();

        let interval = t.config.health_check_interval_ms as i64;
        let later = Utc::now() + chrono::Duration::milliseconds(4 * interval);
        t.record_activity(root, later).unwrap();
        t.health_check_tick(later);
        assert_eq!(t.node(worker).unwrap().status, NodeStatus::Degraded);

        let much_later = Utc::now() + chrono::Duration::milliseconds(7 * interval);
        t.record_activity(root, much_later).unwrap();
        t.health_check_tick(much_later);
        assert_eq!(t.node(worker).unwrap().status, NodeStatus::Failed);
    }

    #[test]
    fn test_balance_score_bounds() {
        let t = topology(SelectionStrategy::LeastLoaded);
        let root = seed_root(&t);
        assert_eq!(t.balance_score(), 1.0);

        let a = t
            .add_node(NodeKind::Worker, TaskDomain::Generic, Some(root), 100.0, caps(&[]))
            .unwrap();
        let b = t
            .add_node(NodeKind::Worker, TaskDomain::Generic, Some(root), 100.0, caps(&[]))
            .unwrap();
        t.update_node_load(a, 50.0).unwrap();
        t.update_node_load(b, 50.0).unwrap();
        let even = t.balance_score();

        t.update_node_load(b, -50.0).unwrap();
        let skewed = t.balance_score();
        assert!(even > skewed);
        assert!((0.0..=1.0).contains(&even));
        assert!((0.0..=1.0).contains(&skewed));
    }
}

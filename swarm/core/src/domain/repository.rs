// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Storage contracts for the node table and the plan/assignment tables,
//! implemented in `aegis-swarm-engine::infrastructure::repositories`. The
//! in-memory tables sit behind these traits so a durable backing store can be
//! substituted without touching algorithmic code.
//!
//! Reads return owned snapshot copies, never live references; each table is
//! mutated only by its owning component.

use thiserror::Error;

use crate::domain::node::{HierarchyNode, NodeId};
use crate::domain::task::{Assignment, AssignmentId, DistributionPlan, PlanId, TaskId};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

/// Id-indexed table of hierarchy nodes.
pub trait NodeRepository: Send + Sync {
    fn insert(&self, node: HierarchyNode);

    /// Snapshot copy of one node.
    fn get(&self, id: NodeId) -> Option<HierarchyNode>;

    /// Apply a mutation to one node under the repository's lock.
    fn update(
        &self,
        id: NodeId,
        f: &mut dyn FnMut(&mut HierarchyNode),
    ) -> Result<(), RepositoryError>;

    fn remove(&self, id: NodeId) -> Option<HierarchyNode>;

    /// Snapshot copies of all nodes.
    fn list(&self) -> Vec<HierarchyNode>;

    fn count(&self) -> usize;
}

/// Distribution plans plus the active-assignment table.
pub trait PlanRepository: Send + Sync {
    fn insert_plan(&self, plan: DistributionPlan);

    fn get_plan(&self, id: PlanId) -> Option<DistributionPlan>;

    fn plan_for_task(&self, task: TaskId) -> Option<DistributionPlan>;

    fn list_plans(&self) -> Vec<DistributionPlan>;

    fn remove_plan(&self, id: PlanId) -> Option<DistributionPlan>;

    /// Insert a new assignment.
    ///
    /// # Errors
    ///
    /// `InvariantViolation` if a non-terminal assignment already exists for
    /// the same task id.
    fn insert_assignment(&self, assignment: Assignment) -> Result<(), RepositoryError>;

    fn get_assignment(&self, id: AssignmentId) -> Option<Assignment>;

    fn update_assignment(
        &self,
        id: AssignmentId,
        f: &mut dyn FnMut(&mut Assignment),
    ) -> Result<(), RepositoryError>;

    /// Full audit trail for one task, oldest first (reassigned records are
    /// retained, never deleted).
    fn assignments_for_task(&self, task: TaskId) -> Vec<Assignment>;

    /// The single non-terminal assignment for a task, if any.
    fn active_assignment(&self, task: TaskId) -> Option<Assignment>;

    /// All non-terminal assignments.
    fn active_assignments(&self) -> Vec<Assignment>;
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-memory repository implementations.
//!
//! Id-indexed tables behind `parking_lot` locks. Reads hand out owned clones
//! so callers never observe partial updates; the task→assignment index is a
//! derived secondary index, rebuilt on every insert, never a second source of
//! truth.

use std::collections::HashMap;

use aegis_swarm_core::domain::node::{HierarchyNode, NodeId};
use aegis_swarm_core::domain::repository::{NodeRepository, PlanRepository, RepositoryError};
use aegis_swarm_core::domain::task::{
    Assignment, AssignmentId, DistributionPlan, PlanId, TaskId,
};
use parking_lot::RwLock;

/// In-memory node table.
#[derive(Default)]
pub struct InMemoryNodeRepository {
    nodes: RwLock<HashMap<NodeId, HierarchyNode>>,
}

impl InMemoryNodeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeRepository for InMemoryNodeRepository {
    fn insert(&self, node: HierarchyNode) {
        self.nodes.write().insert(node.id, node);
    }

    fn get(&self, id: NodeId) -> Option<HierarchyNode> {
        self.nodes.read().get(&id).cloned()
    }

    fn update(
        &self,
        id: NodeId,
        f: &mut dyn FnMut(&mut HierarchyNode),
    ) -> Result<(), RepositoryError> {
        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("node {id}")))?;
        f(node);
        Ok(())
    }

    fn remove(&self, id: NodeId) -> Option<HierarchyNode> {
        self.nodes.write().remove(&id)
    }

    fn list(&self) -> Vec<HierarchyNode> {
        self.nodes.read().values().cloned().collect()
    }

    fn count(&self) -> usize {
        self.nodes.read().len()
    }
}

/// In-memory plan and assignment tables.
#[derive(Default)]
pub struct InMemoryPlanRepository {
    plans: RwLock<HashMap<PlanId, DistributionPlan>>,
    assignments: RwLock<HashMap<AssignmentId, Assignment>>,
    /// Derived index: task id → assignment ids, in insertion order.
    by_task: RwLock<HashMap<TaskId, Vec<AssignmentId>>>,
}

impl InMemoryPlanRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlanRepository for InMemoryPlanRepository {
    fn insert_plan(&self, plan: DistributionPlan) {
        self.plans.write().insert(plan.id, plan);
    }

    fn get_plan(&self, id: PlanId) -> Option<DistributionPlan> {
        self.plans.read().get(&id).cloned()
    }

    fn plan_for_task(&self, task: TaskId) -> Option<DistributionPlan> {
        self.plans
            .read()
            .values()
            .find(|p| p.task_id == task || p.subtasks.iter().any(|s| s.id == task))
            .cloned()
    }

    fn list_plans(&self) -> Vec<DistributionPlan> {
        self.plans.read().values().cloned().collect()
    }

    fn remove_plan(&self, id: PlanId) -> Option<DistributionPlan> {
        self.plans.write().remove(&id)
    }

    fn insert_assignment(&self, assignment: Assignment) -> Result<(), RepositoryError> {
        let mut assignments = self.assignments.write();
        let mut by_task = self.by_task.write();

        let existing = by_task.get(&assignment.task_id);
        if let Some(ids) = existing {
            let live = ids
                .iter()
                .filter_map(|id| assignments.get(id))
                .any(|a| !a.is_terminal());
            if live {
                return Err(RepositoryError::InvariantViolation(format!(
                    "task {} already has a non-terminal assignment",
                    assignment.task_id
                )));
            }
        }

        by_task
            .entry(assignment.task_id)
            .or_default()
            .push(assignment.id);
        assignments.insert(assignment.id, assignment);
        Ok(())
    }

    fn get_assignment(&self, id: AssignmentId) -> Option<Assignment> {
        self.assignments.read().get(&id).cloned()
    }

    fn update_assignment(
        &self,
        id: AssignmentId,
        f: &mut dyn FnMut(&mut Assignment),
    ) -> Result<(), RepositoryError> {
        let mut assignments = self.assignments.write();
        let assignment = assignments
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("assignment {id}")))?;
        f(assignment);
        Ok(())
    }

    fn assignments_for_task(&self, task: TaskId) -> Vec<Assignment> {
        let assignments = self.assignments.read();
        self.by_task
            .read()
            .get(&task)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| assignments.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn active_assignment(&self, task: TaskId) -> Option<Assignment> {
        self.assignments_for_task(task)
            .into_iter()
            .find(|a| !a.is_terminal())
    }

    fn active_assignments(&self) -> Vec<Assignment> {
        self.assignments
            .read()
            .values()
            .filter(|a| !a.is_terminal())
            .cloned()
            .collect()
    }
}

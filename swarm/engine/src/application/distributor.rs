// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task Distributor
//!
//! Turns submitted tasks into distribution plans (complexity scoring,
//! decomposition, dependency validation, MECE check), binds subtasks to
//! hierarchy nodes per the configured assignment strategy, and drives subtask
//! execution through the backend with bounded reassignment on failure.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use aegis_swarm_core::domain::backend::{ExecutionBackend, ExecutionResult};
use aegis_swarm_core::domain::config::{AssignmentStrategy, DistributorConfig};
use aegis_swarm_core::domain::drone::TaskReport;
use aegis_swarm_core::domain::events::AssignmentEvent;
use aegis_swarm_core::domain::node::{HierarchyNode, NodeId};
use aegis_swarm_core::domain::repository::PlanRepository;
use aegis_swarm_core::domain::task::{
    Assignment, AssignmentId, AssignmentStatus, DependencyEdge, DependencyKind, DistributionError,
    DistributionPlan, PlanId, ResourceFootprint, SubTask, TaskDomain, TaskId, TaskSpec,
};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::application::graph::DependencyGraph;
use crate::application::mece::{self, MeceReport};
use crate::application::pool::DronePoolManager;
use crate::application::topology::HierarchyTopology;
use crate::infrastructure::EventBus;

/// Load applied to an assignee per active assignment, in topology units.
const LOAD_PER_ASSIGNMENT: f64 = 1.0;

/// Aggregate progress of one task's plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_flight: usize,
}

impl PlanProgress {
    pub fn fraction_complete(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

pub struct TaskDistributor {
    plans: Arc<dyn PlanRepository>,
    topology: Arc<HierarchyTopology>,
    pools: Arc<DronePoolManager>,
    backend: Arc<dyn ExecutionBackend>,
    events: EventBus,
    config: DistributorConfig,
    rr_cursor: AtomicUsize,
}

impl TaskDistributor {
    pub fn new(
        plans: Arc<dyn PlanRepository>,
        topology: Arc<HierarchyTopology>,
        pools: Arc<DronePoolManager>,
        backend: Arc<dyn ExecutionBackend>,
        events: EventBus,
        config: DistributorConfig,
    ) -> Self {
        Self {
            plans,
            topology,
            pools,
            backend,
            events,
            config,
            rr_cursor: AtomicUsize::new(0),
        }
    }

    /// Additive complexity score: base 2.0, +0.5 per touched file, +1.5 per
    /// external dependency, +1 per 200 estimated lines, capped.
    pub fn complexity_score(&self, task: &TaskSpec) -> f64 {
        let score = 2.0
            + 0.5 * task.files.len() as f64
            + 1.5 * task.dependencies.len() as f64
            + task.estimated_loc as f64 / 200.0;
        score.min(self.config.complexity_cap)
    }

    /// A task is decomposed when its complexity exceeds the threshold or it
    /// breaches any per-domain limit.
    pub fn needs_decomposition(&self, task: &TaskSpec) -> bool {
        let limits = task.domain.decomposition_limits();
        self.complexity_score(task) > self.config.complexity_threshold
            || task.files.len() > limits.max_files
            || task.estimated_loc > limits.max_loc
            || task.estimated_duration_ms > limits.max_duration_ms
    }

    /// Build the immutable plan for a task: decompose (or mirror), reject
    /// cyclic dependency graphs, compute the critical path, and run the
    /// advisory MECE check.
    ///
    /// # Errors
    ///
    /// `CycleDetected` when the decomposition's dependency edges form a cycle.
    pub fn create_plan(&self, task: &TaskSpec) -> Result<DistributionPlan, DistributionError> {
        let (subtasks, dependencies) = if self.needs_decomposition(task) {
            self.decompose(task)
        } else {
            (vec![Self::mirror_subtask(task)], Vec::new())
        };

        let graph = DependencyGraph::build(&subtasks, &dependencies);
        graph.validate_no_cycles()?;

        let report = self.validate_mece(task, &subtasks);
        if !report.valid {
            warn!(
                task = %task.id,
                score = report.score,
                "decomposition fails the MECE floor; distributing anyway"
            );
            for rec in &report.recommendations {
                debug!(task = %task.id, recommendation = rec, "mece recommendation");
            }
        }

        let plan = DistributionPlan {
            id: PlanId::new(),
            task_id: task.id,
            estimated_completion_ms: graph.critical_path_ms(),
            parallelizable: graph.is_parallelizable(),
            subtasks,
            dependencies,
            created_at: Utc::now(),
        };

        info!(
            task = %task.id,
            plan = %plan.id,
            subtasks = plan.subtasks.len(),
            estimated_ms = plan.estimated_completion_ms,
            "distribution plan created"
        );
        self.events
            .publish_assignment_event(AssignmentEvent::PlanCreated {
                plan_id: plan.id,
                task_id: task.id,
                subtask_count: plan.subtasks.len(),
                estimated_completion_ms: plan.estimated_completion_ms,
                created_at: plan.created_at,
            });
        metrics::counter!("aegis_swarm_plans_created").increment(1);

        self.plans.insert_plan(plan.clone());
        Ok(plan)
    }

    /// Advisory MECE validation for a decomposition.
    pub fn validate_mece(&self, task: &TaskSpec, subtasks: &[SubTask]) -> MeceReport {
        mece::validate(
            task,
            subtasks,
            self.config.overlap_threshold,
            self.config.mece_validity_floor,
        )
    }

    fn decompose(&self, task: &TaskSpec) -> (Vec<SubTask>, Vec<DependencyEdge>) {
        match task.domain {
            TaskDomain::Development => Self::decompose_development(task),
            _ => Self::bisect(task),
        }
    }

    /// Development tasks follow the fixed plan → implement → test pipeline
    /// with strict sequence edges. Durations split 20/50/30.
    fn decompose_development(task: &TaskSpec) -> (Vec<SubTask>, Vec<DependencyEdge>) {
        let total = task.estimated_duration_ms;
        let plan_ms = total / 5;
        let implement_ms = total / 2;
        let test_ms = total - plan_ms - implement_ms;

        let plan = Self::child(task, "plan", plan_ms, &["planning"], vec![]);
        let implement = Self::child(task, "implement", implement_ms, &["coding"], vec![plan.id]);
        let test = Self::child(task, "test", test_ms, &["testing"], vec![implement.id]);

        let edges = vec![
            DependencyEdge {
                from: plan.id,
                to: implement.id,
                kind: DependencyKind::Sequence,
            },
            DependencyEdge {
                from: implement.id,
                to: test.id,
                kind: DependencyKind::Sequence,
            },
        ];
        (vec![plan, implement, test], edges)
    }

    /// Fallback decomposition: split the work into two independent halves.
    fn bisect(task: &TaskSpec) -> (Vec<SubTask>, Vec<DependencyEdge>) {
        let half = task.estimated_duration_ms / 2;
        let first = SubTask {
            id: TaskId::new(),
            parent: task.id,
            domain: task.domain,
            priority: task.priority,
            description: format!("{} (part 1 of 2)", task.description),
            estimated_duration_ms: half,
            required_capabilities: task.required_capabilities.clone(),
            prerequisites: vec![],
            footprint: Self::halved(task.footprint),
        };
        let second = SubTask {
            description: format!("{} (part 2 of 2)", task.description),
            estimated_duration_ms: task.estimated_duration_ms - half,
            ..SubTask {
                id: TaskId::new(),
                ..first.clone()
            }
        };
        (vec![first, second], Vec::new())
    }

    fn child(
        task: &TaskSpec,
        phase: &str,
        duration_ms: u64,
        caps: &[&str],
        prerequisites: Vec<TaskId>,
    ) -> SubTask {
        SubTask {
            id: TaskId::new(),
            parent: task.id,
            domain: task.domain,
            priority: task.priority,
            description: format!("{phase}: {}", task.description),
            estimated_duration_ms: duration_ms,
            required_capabilities: caps.iter().map(|s| s.to_string()).collect(),
            prerequisites,
            footprint: Self::halved(task.footprint),
        }
    }

    fn halved(f: ResourceFootprint) -> ResourceFootprint {
        ResourceFootprint {
            memory_mb: f.memory_mb / 2,
            cpu_cores: f.cpu_cores / 2.0,
            network_mbps: f.network_mbps / 2,
            storage_mb: f.storage_mb / 2,
        }
    }

    /// Single-subtask mirror for tasks that stay whole.
    fn mirror_subtask(task: &TaskSpec) -> SubTask {
        SubTask {
            id: TaskId::new(),
            parent: task.id,
            domain: task.domain,
            priority: task.priority,
            description: task.description.clone(),
            estimated_duration_ms: task.estimated_duration_ms,
            required_capabilities: task.required_capabilities.clone(),
            prerequisites: vec![],
            footprint: task.footprint,
        }
    }

    /// Create one assignment per subtask of the plan. Subtasks with open
    /// prerequisites start PENDING; the rest are bound immediately.
    ///
    /// # Errors
    ///
    /// `NoCandidate` when no available node covers a subtask's capabilities.
    pub fn assign_plan(&self, plan: &DistributionPlan) -> Result<Vec<Assignment>, DistributionError> {
        let mut created = Vec::with_capacity(plan.subtasks.len());
        for subtask in &plan.subtasks {
            let node = self
                .select_assignee(subtask, &HashSet::new())
                .ok_or(DistributionError::NoCandidate(subtask.id))?;

            let mut assignment =
                Assignment::new(subtask.id, node.id, subtask.priority.weight());
            let ready = subtask.prerequisites.is_empty();
            if ready {
                assignment.status = AssignmentStatus::Assigned;
            }

            self.plans
                .insert_assignment(assignment.clone())
                .map_err(|e| DistributionError::AssignmentFailed {
                    task: subtask.id,
                    reason: e.to_string(),
                })?;
            if ready {
                let _ = self.topology.update_node_load(node.id, LOAD_PER_ASSIGNMENT);
            }
            debug!(subtask = %subtask.id, node = %node.id, ready, "subtask assigned");
            created.push(assignment);
        }
        Ok(created)
    }

    /// Pick an assignee for a subtask per the configured strategy, skipping
    /// `excluded` nodes (previous assignees during reassignment).
    fn select_assignee(
        &self,
        subtask: &SubTask,
        excluded: &HashSet<NodeId>,
    ) -> Option<HierarchyNode> {
        let mut candidates: Vec<HierarchyNode> = self
            .topology
            .snapshot()
            .into_iter()
            .filter(|n| n.is_available() && !excluded.contains(&n.id))
            .filter(|n| n.matches_capabilities(&subtask.required_capabilities))
            .collect();
        if candidates.is_empty() {
            return None;
        }
        candidates.sort_by_key(|n| n.id);

        match self.config.assignment {
            AssignmentStrategy::RoundRobin => {
                let idx = self.rr_cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
                Some(candidates.swap_remove(idx))
            }
            AssignmentStrategy::LeastConnections => self.fewest_connections(candidates),
            AssignmentStrategy::CapabilityBased => {
                let matching: Vec<HierarchyNode> = candidates
                    .iter()
                    .filter(|n| n.domain == subtask.domain)
                    .cloned()
                    .collect();
                if matching.is_empty() {
                    self.fewest_connections(candidates)
                } else {
                    self.fewest_connections(matching)
                }
            }
            AssignmentStrategy::ResourceAware => candidates
                .into_iter()
                .min_by(|a, b| a.utilization().total_cmp(&b.utilization())),
        }
    }

    fn fewest_connections(&self, candidates: Vec<HierarchyNode>) -> Option<HierarchyNode> {
        let active = self.plans.active_assignments();
        candidates.into_iter().min_by_key(|n| {
            active
                .iter()
                .filter(|a| a.assignee == n.id && a.status != AssignmentStatus::Pending)
                .count()
        })
    }

    /// Move a task to a new assignee after a failure. The old record is kept
    /// as REASSIGNED; after `max_reassign_attempts` supersessions the task is
    /// marked FAILED instead.
    ///
    /// # Errors
    ///
    /// `AssignmentFailed` when the retry budget is spent, `NoCandidate` when
    /// every eligible node has already been tried.
    pub fn reassign_task(
        &self,
        task: TaskId,
        reason: &str,
    ) -> Result<Assignment, DistributionError> {
        let current = self
            .plans
            .active_assignment(task)
            .ok_or(DistributionError::AssignmentFailed {
                task,
                reason: "no active assignment".to_string(),
            })?;

        let history = self.plans.assignments_for_task(task);
        let prior_reassignments = history
            .iter()
            .filter(|a| a.status == AssignmentStatus::Reassigned)
            .count() as u32;

        let was_active = current.status != AssignmentStatus::Pending;
        if prior_reassignments >= self.config.max_reassign_attempts {
            let _ = self.plans.update_assignment(current.id, &mut |a| {
                a.status = AssignmentStatus::Failed;
                a.updated_at = Utc::now();
            });
            if was_active {
                let _ = self
                    .topology
                    .update_node_load(current.assignee, -LOAD_PER_ASSIGNMENT);
            }
            warn!(task = %task, attempts = prior_reassignments, "reassignment budget spent; task failed");
            self.events
                .publish_assignment_event(AssignmentEvent::AssignmentFailed {
                    assignment_id: current.id,
                    task_id: task,
                    reason: reason.to_string(),
                    failed_at: Utc::now(),
                });
            return Err(DistributionError::AssignmentFailed {
                task,
                reason: format!("retry budget spent after {prior_reassignments} reassignments"),
            });
        }

        let subtask = self
            .plans
            .plan_for_task(task)
            .and_then(|p| p.subtask(task).cloned())
            .ok_or(DistributionError::PlanNotFound(PlanId::new()))
            .map_err(|_| DistributionError::AssignmentFailed {
                task,
                reason: "no plan covers this task".to_string(),
            })?;

        let excluded: HashSet<NodeId> = history.iter().map(|a| a.assignee).collect();
        let node = self
            .select_assignee(&subtask, &excluded)
            .ok_or(DistributionError::NoCandidate(task))?;

        // Supersede first so the single-live-assignment invariant holds.
        let _ = self.plans.update_assignment(current.id, &mut |a| {
            a.status = AssignmentStatus::Reassigned;
            a.updated_at = Utc::now();
        });
        if was_active {
            let _ = self
                .topology
                .update_node_load(current.assignee, -LOAD_PER_ASSIGNMENT);
        }

        let mut replacement = Assignment::new(task, node.id, subtask.priority.weight());
        replacement.status = AssignmentStatus::Assigned;
        self.plans
            .insert_assignment(replacement.clone())
            .map_err(|e| DistributionError::AssignmentFailed {
                task,
                reason: e.to_string(),
            })?;
        let _ = self.topology.update_node_load(node.id, LOAD_PER_ASSIGNMENT);

        info!(task = %task, from = %current.assignee, to = %node.id, reason, "task reassigned");
        metrics::counter!("aegis_swarm_reassignments").increment(1);
        self.events
            .publish_assignment_event(AssignmentEvent::AssignmentReassigned {
                task_id: task,
                from: current.assignee,
                to: node.id,
                reason: reason.to_string(),
                reassigned_at: Utc::now(),
            });
        Ok(replacement)
    }

    /// Mark an assignment completed, release its assignee's load, and promote
    /// any sibling subtask whose prerequisites are now all complete.
    pub fn complete_assignment(&self, id: AssignmentId) -> Result<(), DistributionError> {
        let assignment =
            self.plans
                .get_assignment(id)
                .ok_or(DistributionError::AssignmentFailed {
                    task: TaskId::new(),
                    reason: format!("assignment {id} not found"),
                })?;

        let was_active = assignment.status != AssignmentStatus::Pending;
        let _ = self.plans.update_assignment(id, &mut |a| {
            a.status = AssignmentStatus::Completed;
            a.updated_at = Utc::now();
        });
        if was_active {
            let _ = self
                .topology
                .update_node_load(assignment.assignee, -LOAD_PER_ASSIGNMENT);
        }
        self.events
            .publish_assignment_event(AssignmentEvent::AssignmentCompleted {
                assignment_id: id,
                task_id: assignment.task_id,
                completed_at: Utc::now(),
            });

        if let Some(plan) = self.plans.plan_for_task(assignment.task_id) {
            self.promote_ready_subtasks(&plan);
        }
        Ok(())
    }

    /// PENDING → ASSIGNED for every subtask whose prerequisites are complete.
    fn promote_ready_subtasks(&self, plan: &DistributionPlan) {
        let completed: HashSet<TaskId> = plan
            .subtasks
            .iter()
            .filter(|s| {
                self.plans
                    .assignments_for_task(s.id)
                    .iter()
                    .any(|a| a.status == AssignmentStatus::Completed)
            })
            .map(|s| s.id)
            .collect();

        for subtask in &plan.subtasks {
            let Some(assignment) = self.plans.active_assignment(subtask.id) else {
                continue;
            };
            if assignment.status != AssignmentStatus::Pending {
                continue;
            }
            if subtask.prerequisites.iter().all(|p| completed.contains(p)) {
                let _ = self.plans.update_assignment(assignment.id, &mut |a| {
                    a.status = AssignmentStatus::Assigned;
                    a.updated_at = Utc::now();
                });
                let _ = self
                    .topology
                    .update_node_load(assignment.assignee, LOAD_PER_ASSIGNMENT);
                debug!(subtask = %subtask.id, "prerequisites complete; assignment promoted");
            }
        }
    }

    /// Execute one subtask through the backend, holding a compatible drone
    /// for the duration. A failed execution consumes one reassignment and is
    /// retried on the new assignee until the budget is spent.
    ///
    /// # Errors
    ///
    /// `AssignmentFailed` once reassignment is exhausted or allocation fails.
    pub async fn run_subtask(&self, subtask: &SubTask) -> Result<ExecutionResult, DistributionError> {
        loop {
            let assignment = self.plans.active_assignment(subtask.id).ok_or(
                DistributionError::AssignmentFailed {
                    task: subtask.id,
                    reason: "no active assignment".to_string(),
                },
            )?;

            let drone = self
                .pools
                .request_drone(
                    &subtask.required_capabilities,
                    subtask.priority.weight(),
                    Some(&subtask.footprint),
                    self.config.allocation_max_wait_ms,
                )
                .await
                .map_err(|e| DistributionError::AssignmentFailed {
                    task: subtask.id,
                    reason: e.to_string(),
                })?;

            let _ = self.plans.update_assignment(assignment.id, &mut |a| {
                a.status = AssignmentStatus::InProgress;
                a.updated_at = Utc::now();
            });
            self.events
                .publish_assignment_event(AssignmentEvent::AssignmentExecuted {
                    assignment_id: assignment.id,
                    task_id: subtask.id,
                    assignee: assignment.assignee,
                    executed_at: Utc::now(),
                });

            match self.backend.execute(subtask).await {
                Ok(result) => {
                    let _ = self.pools.return_drone(
                        drone.id,
                        TaskReport {
                            success: true,
                            duration_ms: result.duration_ms,
                        },
                    );
                    self.complete_assignment(assignment.id)?;
                    return Ok(result);
                }
                Err(err) => {
                    let _ = self.pools.return_drone(
                        drone.id,
                        TaskReport {
                            success: false,
                            duration_ms: 0,
                        },
                    );
                    warn!(subtask = %subtask.id, error = %err, "subtask execution failed");
                    // Consumes one reassignment; errors out once the budget
                    // is spent.
                    self.reassign_task(subtask.id, &err.to_string())?;
                }
            }
        }
    }

    pub fn plan_for_task(&self, task: TaskId) -> Option<DistributionPlan> {
        self.plans.plan_for_task(task)
    }

    /// Aggregate completion state of one task's plan.
    pub fn progress(&self, task: TaskId) -> Option<PlanProgress> {
        let plan = self.plans.plan_for_task(task)?;
        let mut progress = PlanProgress {
            total: plan.subtasks.len(),
            completed: 0,
            failed: 0,
            in_flight: 0,
        };
        for subtask in &plan.subtasks {
            let records = self.plans.assignments_for_task(subtask.id);
            if records
                .iter()
                .any(|a| a.status == AssignmentStatus::Completed)
            {
                progress.completed += 1;
            } else if records.iter().any(|a| a.status == AssignmentStatus::Failed) {
                progress.failed += 1;
            } else if !records.is_empty() {
                progress.in_flight += 1;
            }
        }
        Some(progress)
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Coordinator
//!
//! Facade wiring the topology, distributor, pool manager and resolver over a
//! shared event bus, plus the [`ActionExecutor`] implementation that lets
//! resolution actions touch real topology and assignment state (with an undo
//! log backing rollback).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use aegis_swarm_core::domain::backend::{ExecutionBackend, ExecutionResult, LoadReading};
use aegis_swarm_core::domain::config::CoordinationConfig;
use aegis_swarm_core::domain::conflict::{
    ActionExecutor, ActionKind, Conflict, ConflictType, ResolutionAction, ResolutionError,
};
use aegis_swarm_core::domain::node::{NodeId, TopologyError};
use aegis_swarm_core::domain::repository::PlanRepository;
use aegis_swarm_core::domain::task::{
    AssignmentId, AssignmentStatus, DistributionError, DistributionPlan, TaskSpec,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::application::distributor::TaskDistributor;
use crate::application::graph::DependencyGraph;
use crate::application::pool::DronePoolManager;
use crate::application::resolver::ConflictResolver;
use crate::application::topology::{HierarchyTopology, RedistributionOutcome};
use crate::infrastructure::{
    EventBus, EventReceiver, InMemoryNodeRepository, InMemoryPlanRepository,
};

/// Point-in-time summary of the whole swarm, for observers.
#[derive(Debug, Clone, Serialize)]
pub struct SwarmStatus {
    pub nodes: usize,
    pub balance_score: f64,
    pub total_drones: usize,
    pub busy_drones: usize,
    pub queued_allocations: usize,
    pub active_assignments: usize,
    pub active_conflicts: usize,
}

/// Applies resolution actions to the swarm's topology and assignment state.
///
/// Reversible actions push an undo record before mutating; rollback pops the
/// most recent record for the same target and action shape.
pub struct SwarmActionExecutor {
    topology: Arc<HierarchyTopology>,
    plans: Arc<dyn PlanRepository>,
    distributor: Mutex<Option<Arc<TaskDistributor>>>,
    /// Nodes currently delayed by a Throttle action, with their delay.
    throttled: Mutex<HashMap<NodeId, u64>>,
    undo: Mutex<Vec<UndoRecord>>,
}

enum UndoRecord {
    Reprioritize {
        target: NodeId,
        previous: Vec<(AssignmentId, u8)>,
    },
    Throttle {
        target: NodeId,
        previous: Option<u64>,
    },
    CapabilityAdded {
        target: NodeId,
        capability: String,
        was_present: bool,
    },
}

impl SwarmActionExecutor {
    pub fn new(topology: Arc<HierarchyTopology>, plans: Arc<dyn PlanRepository>) -> Self {
        Self {
            topology,
            plans,
            distributor: Mutex::new(None),
            throttled: Mutex::new(HashMap::new()),
            undo: Mutex::new(Vec::new()),
        }
    }

    /// Late binding: the distributor is constructed after the executor
    /// because the resolver sits between them.
    pub fn attach_distributor(&self, distributor: Arc<TaskDistributor>) {
        *self.distributor.lock() = Some(distributor);
    }

    /// Current throttle delay for a node, if any.
    pub fn throttle_for(&self, node: NodeId) -> Option<u64> {
        self.throttled.lock().get(&node).copied()
    }

    fn fail(reason: impl Into<String>) -> ResolutionError {
        ResolutionError::Failed {
            conflict: aegis_swarm_core::domain::conflict::ConflictId::new(),
            reason: reason.into(),
        }
    }

    fn add_capability(&self, target: NodeId, capability: &str) -> Result<(), ResolutionError> {
        let added = self
            .topology
            .grant_capability(target, capability)
            .map_err(|e| Self::fail(e.to_string()))?;
        self.undo.lock().push(UndoRecord::CapabilityAdded {
            target,
            capability: capability.to_string(),
            was_present: !added,
        });
        Ok(())
    }
}

#[async_trait]
impl ActionExecutor for SwarmActionExecutor {
    async fn apply(&self, action: &ResolutionAction) -> Result<(), ResolutionError> {
        match &action.kind {
            ActionKind::Reassign => {
                let distributor = self
                    .distributor
                    .lock()
                    .clone()
                    .ok_or_else(|| Self::fail("no distributor attached"))?;
                let held: Vec<_> = self
                    .plans
                    .active_assignments()
                    .into_iter()
                    .filter(|a| a.assignee == action.target)
                    .collect();
                // Nothing to move is a successful no-op.
                for assignment in held {
                    distributor
                        .reassign_task(assignment.task_id, "conflict resolution")
                        .map_err(|e| Self::fail(e.to_string()))?;
                }
                Ok(())
            }
            ActionKind::Reprioritize { new_priority } => {
                let held: Vec<_> = self
                    .plans
                    .active_assignments()
                    .into_iter()
                    .filter(|a| a.assignee == action.target)
                    .collect();
                let previous: Vec<(AssignmentId, u8)> =
                    held.iter().map(|a| (a.id, a.priority)).collect();
                for assignment in &held {
                    self.plans
                        .update_assignment(assignment.id, &mut |a| {
                            a.priority = *new_priority;
                            a.updated_at = Utc::now();
                        })
                        .map_err(|e| Self::fail(e.to_string()))?;
                }
                self.undo.lock().push(UndoRecord::Reprioritize {
                    target: action.target,
                    previous,
                });
                Ok(())
            }
            ActionKind::Throttle { delay_ms } => {
                let previous = self.throttled.lock().insert(action.target, *delay_ms);
                self.undo.lock().push(UndoRecord::Throttle {
                    target: action.target,
                    previous,
                });
                debug!(node = %action.target, delay_ms, "node throttled");
                Ok(())
            }
            ActionKind::Reallocate { resource } => {
                self.add_capability(action.target, &format!("holds:{resource}"))
            }
            ActionKind::Specialize { capability } => {
                self.add_capability(action.target, capability)
            }
            ActionKind::Escalate => {
                // The resolver publishes the escalation event; nothing to
                // mutate at this tier.
                warn!(node = %action.target, "conflict escalated past this coordinator");
                Ok(())
            }
        }
    }

    async fn rollback(&self, action: &ResolutionAction) -> Result<(), ResolutionError> {
        let record = {
            let mut undo = self.undo.lock();
            let idx = undo.iter().rposition(|r| match (r, &action.kind) {
                (UndoRecord::Reprioritize { target, .. }, ActionKind::Reprioritize { .. }) => {
                    *target == action.target
                }
                (UndoRecord::Throttle { target, .. }, ActionKind::Throttle { .. }) => {
                    *target == action.target
                }
                (
                    UndoRecord::CapabilityAdded { target, .. },
                    ActionKind::Reallocate { .. } | ActionKind::Specialize { .. },
                ) => *target == action.target,
                _ => false,
            });
            idx.map(|i| undo.remove(i))
        };
        let Some(record) = record else {
            return Err(Self::fail("no undo record for action"));
        };

        match record {
            UndoRecord::Reprioritize { previous, .. } => {
                for (id, priority) in previous {
                    let _ = self.plans.update_assignment(id, &mut |a| {
                        a.priority = priority;
                        a.updated_at = Utc::now();
                    });
                }
            }
            UndoRecord::Throttle { target, previous } => {
                let mut throttled = self.throttled.lock();
                match previous {
                    Some(delay) => {
                        throttled.insert(target, delay);
                    }
                    None => {
                        throttled.remove(&target);
                    }
                }
            }
            UndoRecord::CapabilityAdded {
                target,
                capability,
                was_present,
            } => {
                if !was_present {
                    let _ = self.topology.revoke_capability(target, &capability);
                }
            }
        }
        Ok(())
    }
}

pub struct SwarmCoordinator {
    config: CoordinationConfig,
    events: EventBus,
    topology: Arc<HierarchyTopology>,
    pools: Arc<DronePoolManager>,
    distributor: Arc<TaskDistributor>,
    resolver: Arc<ConflictResolver>,
    executor: Arc<SwarmActionExecutor>,
    plans: Arc<dyn PlanRepository>,
}

impl SwarmCoordinator {
    /// Wire the full coordination stack over in-memory repositories and a
    /// shared event bus.
    pub fn new(backend: Arc<dyn ExecutionBackend>, config: CoordinationConfig) -> Self {
        let events = EventBus::with_default_capacity();
        let nodes = Arc::new(InMemoryNodeRepository::new());
        let plans: Arc<dyn PlanRepository> = Arc::new(InMemoryPlanRepository::new());

        let topology = Arc::new(HierarchyTopology::new(
            nodes,
            events.clone(),
            config.topology.clone(),
        ));
        let pools = Arc::new(DronePoolManager::new(events.clone(), config.pools.clone()));
        let executor = Arc::new(SwarmActionExecutor::new(topology.clone(), plans.clone()));
        let resolver = Arc::new(ConflictResolver::new(
            topology.clone(),
            executor.clone(),
            events.clone(),
            config.resolver.clone(),
        ));
        let distributor = Arc::new(TaskDistributor::new(
            plans.clone(),
            topology.clone(),
            pools.clone(),
            backend,
            events.clone(),
            config.distributor.clone(),
        ));
        executor.attach_distributor(distributor.clone());

        Self {
            config,
            events,
            topology,
            pools,
            distributor,
            resolver,
            executor,
            plans,
        }
    }

    pub fn config(&self) -> &CoordinationConfig {
        &self.config
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn topology(&self) -> &Arc<HierarchyTopology> {
        &self.topology
    }

    pub fn pools(&self) -> &Arc<DronePoolManager> {
        &self.pools
    }

    pub fn distributor(&self) -> &Arc<TaskDistributor> {
        &self.distributor
    }

    pub fn resolver(&self) -> &Arc<ConflictResolver> {
        &self.resolver
    }

    pub fn executor(&self) -> &Arc<SwarmActionExecutor> {
        &self.executor
    }

    /// Plan and assign a task without executing it.
    pub fn submit_task(&self, task: &TaskSpec) -> Result<DistributionPlan, DistributionError> {
        let plan = self.distributor.create_plan(task)?;
        self.distributor.assign_plan(&plan)?;
        Ok(plan)
    }

    /// Plan, assign and execute a task end to end, running each dependency
    /// wave concurrently. Results arrive in completion order of the waves.
    pub async fn execute_task(
        &self,
        task: &TaskSpec,
    ) -> Result<Vec<ExecutionResult>, DistributionError> {
        let plan = self.submit_task(task)?;
        let graph = DependencyGraph::build(&plan.subtasks, &plan.dependencies);

        let mut completed: HashSet<_> = HashSet::new();
        let mut results = Vec::with_capacity(plan.subtasks.len());
        while completed.len() < plan.subtasks.len() {
            let ready = graph.ready_tasks(&completed);
            if ready.is_empty() {
                return Err(DistributionError::Decomposition(
                    "no runnable subtask remains".to_string(),
                ));
            }
            let wave = futures::future::join_all(ready.iter().map(|id| {
                // Ids come from the graph, which was built from this plan.
                let subtask = plan.subtask(*id).expect("subtask belongs to plan");
                self.distributor.run_subtask(subtask)
            }))
            .await;
            for (id, outcome) in ready.into_iter().zip(wave) {
                results.push(outcome?);
                completed.insert(id);
            }
        }
        info!(task = %task.id, subtasks = results.len(), "task executed");
        Ok(results)
    }

    /// Handle a node failure: redistribute its load, and raise a resource
    /// conflict when the load had nowhere to go.
    pub fn node_failed(&self, id: NodeId) -> Result<RedistributionOutcome, TopologyError> {
        let outcome = self.topology.mark_node_failed(id)?;
        if let RedistributionOutcome::Dropped { load } = outcome {
            warn!(node = %id, load, "dropped load; raising resource conflict");
            self.resolver.detect_conflict(
                ConflictType::ResourceContention,
                vec![id],
                vec!["capacity".to_string()],
                format!("{load} load units dropped by failed node"),
            );
        }
        Ok(outcome)
    }

    /// Fold a batch of telemetry readings into the topology and the
    /// resolver's performance history.
    pub fn apply_telemetry(&self, readings: &[LoadReading]) {
        for reading in readings {
            if self
                .topology
                .update_node_load(reading.node, reading.load_delta)
                .is_err()
            {
                debug!(node = %reading.node, "telemetry for unknown node ignored");
                continue;
            }
            let _ = self.topology.record_activity(reading.node, reading.recorded_at);
            self.resolver
                .record_performance(reading.node, reading.performance);
        }
    }

    /// Turn degradation forecasts into detected conflicts. Returns the
    /// conflicts raised in this sweep.
    pub fn degradation_sweep(&self) -> Vec<Conflict> {
        self.resolver
            .predict_degradation()
            .into_iter()
            .map(|forecast| {
                self.resolver.detect_conflict(
                    ConflictType::PerformanceDegradation,
                    vec![forecast.node],
                    vec![],
                    format!(
                        "performance trending down (slope {:.3}, eta {}ms)",
                        forecast.slope, forecast.eta_ms
                    ),
                )
            })
            .collect()
    }

    /// Run the periodic maintenance passes once (normally driven by the
    /// scheduler).
    pub fn maintenance_tick(&self, now: DateTime<Utc>) {
        self.topology.health_check_tick(now);
        self.pools.health_tick(now);
        self.pools.autoscale_tick();
        self.resolver.evaluation_tick(now);
    }

    pub fn status(&self) -> SwarmStatus {
        SwarmStatus {
            nodes: self.topology.snapshot().len(),
            balance_score: self.topology.balance_score(),
            total_drones: self.pools.total_drones(),
            busy_drones: self.pools.busy_drones(),
            queued_allocations: self.pools.queued_requests(),
            active_assignments: self
                .plans
                .active_assignments()
                .iter()
                .filter(|a| a.status != AssignmentStatus::Pending)
                .count(),
            active_conflicts: self.resolver.active_conflicts().len(),
        }
    }
}

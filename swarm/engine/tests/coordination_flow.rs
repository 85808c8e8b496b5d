// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! End-to-end coordination scenarios over the public engine surface.

use std::collections::BTreeSet;
use std::sync::Arc;

use aegis_swarm_core::domain::backend::{ExecutionBackend, ExecutionError, ExecutionResult};
use aegis_swarm_core::domain::config::CoordinationConfig;
use aegis_swarm_core::domain::drone::{PoolConfig, PoolError};
use aegis_swarm_core::domain::node::{NodeKind, TopologyError};
use aegis_swarm_core::domain::repository::RepositoryError;
use aegis_swarm_core::domain::task::{
    Assignment, AssignmentStatus, DependencyKind, PriorityTier, SubTask, TaskDomain, TaskId,
    TaskSpec,
};
use aegis_swarm_engine::application::mece::{self, OverlapRisk};
use aegis_swarm_engine::application::RedistributionOutcome;
use aegis_swarm_engine::infrastructure::{InMemoryPlanRepository, SwarmEvent};
use aegis_swarm_engine::SwarmCoordinator;
use async_trait::async_trait;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

fn caps(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

struct OkBackend;

#[async_trait]
impl ExecutionBackend for OkBackend {
    async fn execute(&self, subtask: &SubTask) -> Result<ExecutionResult, ExecutionError> {
        Ok(ExecutionResult {
            output: serde_json::json!({ "subtask": subtask.id.to_string() }),
            duration_ms: 3,
        })
    }
}

/// Coordinator with a root, two domain coordinators, four workers and one
/// general-purpose pool.
fn seeded_coordinator() -> SwarmCoordinator {
    init_tracing();
    let c = SwarmCoordinator::new(Arc::new(OkBackend), CoordinationConfig::default());
    let root = c
        .topology()
        .add_node(NodeKind::Root, TaskDomain::Generic, None, 1_000.0, caps(&[]))
        .unwrap();
    for domain in [TaskDomain::Development, TaskDomain::Quality] {
        let mid = c
            .topology()
            .add_node(NodeKind::Coordinator, domain, Some(root), 200.0, caps(&[]))
            .unwrap();
        for _ in 0..2 {
            c.topology()
                .add_node(
                    NodeKind::Worker,
                    domain,
                    Some(mid),
                    10.0,
                    caps(&["planning", "coding", "testing", "review", "execution"]),
                )
                .unwrap();
        }
    }
    c.pools()
        .create_pool(PoolConfig {
            worker_type: "general".to_string(),
            capabilities: caps(&["planning", "coding", "testing", "review", "execution"]),
            min_size: 2,
            max_size: 8,
        })
        .unwrap();
    c
}

fn complex_dev_task() -> TaskSpec {
    TaskSpec::new(TaskDomain::Development, "implement streaming export")
        .with_files((0..12).map(|i| format!("src/export/f{i}.rs")).collect())
        .with_estimated_loc(3_000)
        .with_estimated_duration_ms(900_000)
        .with_priority(PriorityTier::High)
}

#[test]
fn development_plan_has_sequential_pipeline() {
    let c = seeded_coordinator();
    let task = complex_dev_task();
    let plan = c.distributor().create_plan(&task).unwrap();

    assert_eq!(plan.subtasks.len(), 3);
    assert_eq!(plan.dependencies.len(), 2);
    assert!(plan
        .dependencies
        .iter()
        .all(|e| e.kind == DependencyKind::Sequence));
    assert!(!plan.parallelizable);
    // Strictly sequential: the critical path is the sum of phase estimates.
    let total: u64 = plan.subtasks.iter().map(|s| s.estimated_duration_ms).sum();
    assert_eq!(plan.estimated_completion_ms, total);
}

#[test]
fn identical_quality_subtasks_flag_high_risk_overlap() {
    let subtask = |desc: &str| SubTask {
        id: TaskId::new(),
        parent: TaskId::new(),
        domain: TaskDomain::Quality,
        priority: PriorityTier::Normal,
        description: desc.to_string(),
        estimated_duration_ms: 1_000,
        required_capabilities: caps(&["testing"]),
        prerequisites: vec![],
        footprint: Default::default(),
    };
    let findings = mece::detect_semantic_overlaps(
        &[
            subtask("validate release regression coverage"),
            subtask("validate release regression coverage"),
        ],
        0.7,
    );
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].risk, OverlapRisk::High);
}

#[tokio::test]
async fn empty_pool_zero_wait_fails_immediately() {
    let c = seeded_coordinator();
    let pool = c
        .pools()
        .create_pool(PoolConfig {
            worker_type: "scarce".to_string(),
            capabilities: caps(&["gpu-rendering"]),
            min_size: 0,
            max_size: 0,
        })
        .unwrap();

    let err = c
        .pools()
        .request_drone(&caps(&["gpu-rendering"]), 2, None, 0)
        .await;
    assert!(matches!(
        err,
        Err(PoolError::AllocationTimeout { waited_ms: 0 })
    ));
    // Strictly non-blocking: no request parked, nothing spawned.
    assert_eq!(c.pools().queued_requests(), 0);
    assert_eq!(c.pools().pool_status(pool).unwrap().current, 0);
}

#[test]
fn scale_pool_round_trip_is_idempotent() {
    let c = seeded_coordinator();
    let pool = c
        .pools()
        .create_pool(PoolConfig {
            worker_type: "burst".to_string(),
            capabilities: caps(&["execution"]),
            min_size: 1,
            max_size: 5,
        })
        .unwrap();

    assert_eq!(c.pools().scale_pool(pool, 5).unwrap(), 5);
    assert_eq!(c.pools().scale_pool(pool, 5).unwrap(), 5);
    assert_eq!(c.pools().scale_pool(pool, 1).unwrap(), 1);
    assert_eq!(c.pools().scale_pool(pool, 1).unwrap(), 1);
    // Targets outside the configured band clamp to it.
    assert_eq!(c.pools().scale_pool(pool, 0).unwrap(), 1);
    assert_eq!(c.pools().scale_pool(pool, 50).unwrap(), 5);
}

#[test]
fn one_live_assignment_per_task() {
    use aegis_swarm_core::domain::node::NodeId;
    use aegis_swarm_core::domain::repository::PlanRepository;

    let repo = InMemoryPlanRepository::new();
    let task = TaskId::new();
    repo.insert_assignment(Assignment::new(task, NodeId::new(), 3))
        .unwrap();

    let second = repo.insert_assignment(Assignment::new(task, NodeId::new(), 3));
    assert!(matches!(
        second,
        Err(RepositoryError::InvariantViolation(_))
    ));

    // Terminating the live record reopens the slot, and the audit trail
    // keeps both.
    let live = repo.active_assignment(task).unwrap();
    repo.update_assignment(live.id, &mut |a| a.status = AssignmentStatus::Completed)
        .unwrap();
    repo.insert_assignment(Assignment::new(task, NodeId::new(), 3))
        .unwrap();
    assert_eq!(repo.assignments_for_task(task).len(), 2);
}

#[test]
fn hierarchy_enforces_single_root() {
    let c = seeded_coordinator();
    let err = c
        .topology()
        .add_node(NodeKind::Root, TaskDomain::Generic, None, 10.0, caps(&[]));
    assert!(matches!(err, Err(TopologyError::InvalidHierarchy(_))));
}

#[test]
fn failed_coordinator_load_splits_across_siblings() {
    init_tracing();
    let c = SwarmCoordinator::new(Arc::new(OkBackend), CoordinationConfig::default());
    let root = c
        .topology()
        .add_node(NodeKind::Root, TaskDomain::Generic, None, 1_000.0, caps(&[]))
        .unwrap();
    let mut coordinators = Vec::new();
    for domain in [
        TaskDomain::Development,
        TaskDomain::Quality,
        TaskDomain::Research,
    ] {
        coordinators.push(
            c.topology()
                .add_node(NodeKind::Coordinator, domain, Some(root), 200.0, caps(&[]))
                .unwrap(),
        );
    }
    c.topology().update_node_load(coordinators[0], 100.0).unwrap();

    let outcome = c.node_failed(coordinators[0]).unwrap();
    match outcome {
        RedistributionOutcome::Redistributed {
            siblings,
            per_sibling,
        } => {
            assert_eq!(siblings.len(), 2);
            assert_eq!(per_sibling, 50.0);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(c.topology().node(coordinators[0]).unwrap().load, 0.0);
    assert_eq!(c.topology().node(coordinators[1]).unwrap().load, 50.0);
    assert_eq!(c.topology().node(coordinators[2]).unwrap().load, 50.0);
}

#[tokio::test]
async fn execute_task_completes_plan_and_frees_resources() {
    let c = seeded_coordinator();
    let mut events = c.subscribe();
    let task = complex_dev_task();

    let results = c.execute_task(&task).await.unwrap();
    assert_eq!(results.len(), 3);

    let progress = c.distributor().progress(task.id).unwrap();
    assert_eq!(progress.completed, 3);
    assert_eq!(progress.failed, 0);

    let status = c.status();
    assert_eq!(status.active_assignments, 0);
    assert_eq!(status.busy_drones, 0);

    // The bus saw the plan and all three completions.
    let mut plan_created = 0;
    let mut completed = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            SwarmEvent::Assignment(
                aegis_swarm_core::domain::events::AssignmentEvent::PlanCreated { .. },
            ) => plan_created += 1,
            SwarmEvent::Assignment(
                aegis_swarm_core::domain::events::AssignmentEvent::AssignmentCompleted { .. },
            ) => completed += 1,
            _ => {}
        }
    }
    assert_eq!(plan_created, 1);
    assert_eq!(completed, 3);
}

#[test]
fn simple_task_plan_via_block_on() {
    // Exercise the synchronous planning surface off a bare executor.
    let c = seeded_coordinator();
    let task = TaskSpec::new(TaskDomain::Documentation, "update operator runbook");
    let plan = tokio_test::block_on(async { c.submit_task(&task) }).unwrap();
    assert_eq!(plan.subtasks.len(), 1);
    assert!(plan.dependencies.is_empty());
}

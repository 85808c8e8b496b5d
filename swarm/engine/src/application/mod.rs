// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application services of the coordination core.
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | `topology` | Coordinator tree, load routing, failure redistribution |
//! | `graph` | Subtask dependency DAG: cycles, critical path, readiness |
//! | `mece` | Mutual-exclusivity / exhaustiveness checks on decompositions |
//! | `distributor` | Complexity scoring, decomposition, assignment, execution |
//! | `pool` | Drone pools: allocation queue, recycling, autoscaling |
//! | `resolver` | Conflict detection, strategies, rollback, evaluation |
//! | `coordinator` | Facade wiring everything over one event bus |

pub mod coordinator;
pub mod distributor;
pub mod graph;
pub mod mece;
pub mod pool;
pub mod resolver;
pub mod topology;

pub use coordinator::{SwarmActionExecutor, SwarmCoordinator, SwarmStatus};
pub use distributor::{PlanProgress, TaskDistributor};
pub use graph::DependencyGraph;
pub use mece::{GapFinding, GapSeverity, MeceReport, OverlapFinding, OverlapRisk};
pub use pool::DronePoolManager;
pub use resolver::{ConflictResolver, ResolverStatistics};
pub use topology::{HierarchyTopology, RedistributionOutcome};

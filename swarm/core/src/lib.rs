// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `aegis-swarm-core` — Swarm Coordination Domain Model
//!
//! Pure domain types for the AEGIS hierarchical task-coordination core:
//! the coordinator tree, task decomposition records, drone pools, and
//! conflict/resolution aggregates. No I/O dependencies.
//!
//! ## Crate Layout
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`domain::node`] | `HierarchyNode`, `NodeId`, `NodeKind`, `NodeStatus` |
//! | [`domain::task`] | `TaskSpec`, `SubTask`, `DistributionPlan`, `Assignment` |
//! | [`domain::drone`] | `Drone`, `PoolConfig`, `PoolStatus` |
//! | [`domain::conflict`] | `Conflict`, `Resolution`, `ResolutionStrategy` |
//! | [`domain::events`] | Topology / drone / assignment / conflict events |
//! | [`domain::backend`] | `ExecutionBackend`, `TelemetrySource` ports |
//! | [`domain::repository`] | `NodeRepository`, `PlanRepository` contracts |
//! | [`domain::config`] | `CoordinationConfig` and per-component tunables |

pub mod domain;

pub use domain::*;

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `aegis-swarm-engine` — Hierarchical Task Coordination Engine
//!
//! Single-process, in-memory coordination layer implementing a three-tier
//! scheduler: one root coordinator, domain coordinators beneath it, and
//! pool-allocated leaf drones. Suitable for embedding inside a larger
//! distributed system; it does not persist state or attempt consensus.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`application::topology`] | Application | Coordinator tree, routing, rebalancing |
//! | [`application::distributor`] | Application | Decomposition, MECE, assignment |
//! | [`application::pool`] | Application | Drone pools, allocation queue, autoscaling |
//! | [`application::resolver`] | Application | Conflict detection and resolution |
//! | [`application::coordinator`] | Application | Top-level facade and wiring |
//! | [`infrastructure`] | Infrastructure | Event bus, repositories, periodic scheduler |
//!
//! Control flow: a task enters the distributor, is scored and (when complex)
//! decomposed into a MECE subtask set with a dependency DAG, then each ready
//! subtask is routed through the topology to a pool-allocated drone. Persistent
//! overload or repeated failure raises a conflict for the resolver.

pub mod application;
pub mod infrastructure;

pub use application::*;

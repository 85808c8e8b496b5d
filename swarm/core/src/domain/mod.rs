// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Coordination Domain Layer
//!
//! Pure domain types for hierarchical multi-agent coordination.
//! No I/O dependencies.

pub mod backend;
pub mod config;
pub mod conflict;
pub mod drone;
pub mod events;
pub mod node;
pub mod repository;
pub mod task;

pub use backend::*;
pub use config::*;
pub use conflict::*;
pub use drone::*;
pub use events::*;
pub use node::*;
pub use repository::*;
pub use task::*;

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure layer: event bus, in-memory repositories, and the periodic
//! scheduler driving health checks, autoscaling, and evaluation ticks.

pub mod event_bus;
pub mod repositories;
pub mod scheduler;

pub use event_bus::{EventBus, EventBusError, EventReceiver, SwarmEvent};
pub use repositories::{InMemoryNodeRepository, InMemoryPlanRepository};
pub use scheduler::CoordinationScheduler;

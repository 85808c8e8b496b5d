// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Drone & Pool Aggregates
//!
//! Leaf execution units ("drones") drawn from capability-typed pools. A drone
//! is owned exclusively by its pool and never shared across pools; the pool
//! manager is the only component that mutates drone state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::task::ResourceFootprint;

/// Unique identifier for a [`Drone`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DroneId(pub Uuid);

impl DroneId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DroneId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DroneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolId(pub Uuid);

impl PoolId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PoolId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle status of a drone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DroneStatus {
    Idle,
    Assigned,
    Working,
    Returning,
    Maintenance,
    Failed,
}

impl DroneStatus {
    /// Whether the drone currently holds work.
    pub fn is_busy(&self) -> bool {
        matches!(self, DroneStatus::Assigned | DroneStatus::Working)
    }
}

/// Rolling performance counters for one drone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct DronePerformance {
    pub tasks_completed: u64,
    pub tasks_succeeded: u64,
    /// Running average task duration in milliseconds.
    pub avg_duration_ms: f64,
    pub error_count: u32,
}

impl DronePerformance {
    /// Success rate over completed tasks; `1.0` before any task completes.
    pub fn success_rate(&self) -> f64 {
        if self.tasks_completed == 0 {
            1.0
        } else {
            self.tasks_succeeded as f64 / self.tasks_completed as f64
        }
    }

    /// Fold one task outcome into the running counters.
    pub fn record(&mut self, success: bool, duration_ms: u64) {
        self.tasks_completed += 1;
        if success {
            self.tasks_succeeded += 1;
        } else {
            self.error_count += 1;
        }
        let n = self.tasks_completed as f64;
        self.avg_duration_ms += (duration_ms as f64 - self.avg_duration_ms) / n;
    }
}

/// Outcome report handed back with a drone when its task finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    pub success: bool,
    pub duration_ms: u64,
}

/// A leaf execution unit owned by exactly one pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Drone {
    pub id: DroneId,
    pub worker_type: String,
    pub capabilities: BTreeSet<String>,
    pub status: DroneStatus,
    pub pool: PoolId,
    pub performance: DronePerformance,
    pub footprint: ResourceFootprint,
    pub spawned_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Drone {
    pub fn new(pool: PoolId, worker_type: String, capabilities: BTreeSet<String>) -> Self {
        let now = Utc::now();
        Self {
            id: DroneId::new(),
            worker_type,
            capabilities,
            status: DroneStatus::Idle,
            pool,
            performance: DronePerformance::default(),
            footprint: ResourceFootprint::default(),
            spawned_at: now,
            last_activity: now,
        }
    }

    /// Substring-style subset compatibility: every required capability must be
    /// matched by some drone capability where one contains the other.
    /// Deliberately looser than exact equality ("unit-testing" serves a
    /// request for "testing").
    pub fn is_compatible(&self, required: &BTreeSet<String>) -> bool {
        required.iter().all(|req| {
            self.capabilities
                .iter()
                .any(|cap| cap.contains(req.as_str()) || req.contains(cap.as_str()))
        })
    }

    pub fn age_ms(&self, now: DateTime<Utc>) -> u64 {
        (now - self.spawned_at).num_milliseconds().max(0) as u64
    }
}

/// Static configuration of a pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub worker_type: String,
    pub capabilities: BTreeSet<String>,
    pub min_size: usize,
    pub max_size: usize,
}

/// Point-in-time snapshot of a pool, for observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    pub id: PoolId,
    pub worker_type: String,
    pub current: usize,
    pub active: usize,
    pub idle: usize,
    /// Queued demand overlapping this pool's capabilities, per current drone.
    pub demand: f64,
    /// Mean success rate across the pool's drones.
    pub efficiency: f64,
}

/// Capacity errors raised by the pool manager. Recoverable by queuing,
/// backoff, or autoscaling; surfaced only once the wait budget is spent.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no drone became available within {waited_ms}ms")]
    AllocationTimeout { waited_ms: u64 },

    #[error("pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("global drone limit of {limit} reached")]
    GlobalLimitReached { limit: usize },

    #[error("pool not found: {0}")]
    PoolNotFound(PoolId),

    #[error("drone not found: {0}")]
    DroneNotFound(DroneId),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_success_rate_before_first_task() {
        let perf = DronePerformance::default();
        assert_eq!(perf.success_rate(), 1.0);
    }

    #[test]
    fn test_performance_running_average() {
        let mut perf = DronePerformance::default();
        perf.record(true, 100);
        perf.record(true, 300);
        assert_eq!(perf.tasks_completed, 2);
        assert_eq!(perf.tasks_succeeded, 2);
        assert!((perf.avg_duration_ms - 200.0).abs() < f64::EPSILON);
        perf.record(false, 200);
        assert_eq!(perf.error_count, 1);
        assert!((perf.success_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_substring_capability_compatibility() {
        let drone = Drone::new(
            PoolId::new(),
            "qa".to_string(),
            caps(&["unit-testing", "review"]),
        );
        // "testing" is a substring of "unit-testing".
        assert!(drone.is_compatible(&caps(&["testing"])));
        assert!(drone.is_compatible(&caps(&["review"])));
        assert!(!drone.is_compatible(&caps(&["deployment"])));
        assert!(drone.is_compatible(&caps(&[])));
    }
}

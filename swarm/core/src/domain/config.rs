// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Coordination Configuration
//!
//! Every tunable of the coordination core in one serializable tree, with the
//! defaults the components are specified against. Strategy choices are closed
//! enums so exhaustiveness is checked at the match sites.

use serde::{Deserialize, Serialize};

/// Node-selection strategy used by the hierarchy topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionStrategy {
    /// Rotating index over the candidate set.
    RoundRobin,
    /// Maximize spare-capacity ratio.
    Weighted,
    /// Minimize absolute load.
    LeastLoaded,
}

/// Assignee-selection strategy used by the task distributor
/// (distributor-wide, not per-task).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentStrategy {
    RoundRobin,
    /// Fewest active assignments.
    LeastConnections,
    /// Domain match preferred, else least-connections.
    CapabilityBased,
    /// Minimize load/capacity ratio.
    ResourceAware,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Load/capacity ratio above which excess load is shed to siblings.
    pub rebalance_threshold: f64,
    pub health_check_interval_ms: u64,
    pub selection: SelectionStrategy,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            rebalance_threshold: 0.85,
            health_check_interval_ms: 30_000,
            selection: SelectionStrategy::LeastLoaded,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributorConfig {
    /// Complexity score above which a task is decomposed.
    pub complexity_threshold: f64,
    /// Hard cap on the complexity score.
    pub complexity_cap: f64,
    pub assignment: AssignmentStrategy,
    /// Reassignment attempts before a task is reported failed.
    pub max_reassign_attempts: u32,
    /// Pairwise similarity above which two subtasks are flagged as overlap.
    pub overlap_threshold: f64,
    /// MECE score below which a plan is logged as invalid (advisory only).
    pub mece_validity_floor: f64,
    /// Wait budget for drone allocation during subtask execution.
    pub allocation_max_wait_ms: u64,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            complexity_threshold: 10.0,
            complexity_cap: 20.0,
            assignment: AssignmentStrategy::CapabilityBased,
            max_reassign_attempts: 3,
            overlap_threshold: 0.7,
            mece_validity_floor: 0.75,
            allocation_max_wait_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolManagerConfig {
    /// Hard ceiling on drones across all pools.
    pub global_max_drones: usize,
    /// `active/current` ratio above which a pool grows by one.
    pub scale_up_threshold: f64,
    /// `active/current` ratio below which a pool shrinks by one.
    pub scale_down_threshold: f64,
    pub autoscale_interval_ms: u64,
    /// Success rate below which a returning drone is recycled.
    pub recycle_success_floor: f64,
    /// Error count above which a returning drone is recycled.
    pub recycle_error_ceiling: u32,
    /// Age past which a returning drone is recycled.
    pub recycle_max_age_ms: u64,
    /// Unresponsiveness window after which a busy drone is marked failed.
    pub health_timeout_ms: u64,
    pub health_interval_ms: u64,
}

impl Default for PoolManagerConfig {
    fn default() -> Self {
        Self {
            global_max_drones: 64,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            autoscale_interval_ms: 15_000,
            recycle_success_floor: 0.7,
            recycle_error_ceiling: 10,
            recycle_max_age_ms: 3_600_000,
            health_timeout_ms: 60_000,
            health_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Bounded resolution-history length kept for trend analysis.
    pub history_limit: usize,
    /// Delay between implementation and effectiveness sampling.
    pub evaluation_delay_ms: u64,
    /// Rolling performance samples kept per node.
    pub performance_window: usize,
    /// Slope below which a performance trend is considered degrading.
    pub degradation_slope_threshold: f64,
    /// Forecast severity above which a predicted conflict is raised.
    pub degradation_severity_threshold: f64,
    /// Success-probability penalty per generated action.
    pub complexity_penalty_per_action: f64,
    /// Stagger applied per participant by temporal separation.
    pub stagger_delay_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            evaluation_delay_ms: 5_000,
            performance_window: 20,
            degradation_slope_threshold: -0.02,
            degradation_severity_threshold: 0.7,
            complexity_penalty_per_action: 0.05,
            stagger_delay_ms: 1_000,
        }
    }
}

/// Top-level configuration for the whole coordination core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinationConfig {
    pub topology: TopologyConfig,
    pub distributor: DistributorConfig,
    pub pools: PoolManagerConfig,
    pub resolver: ResolverConfig,
}

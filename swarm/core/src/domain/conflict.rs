// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Conflict & Resolution Aggregates
//!
//! Contention between domains (resource, priority, dependency, performance)
//! and the resolutions applied to it. Strategy selection is a closed
//! enumeration rather than string dispatch so the per-strategy action
//! generators can be checked exhaustively.
//!
//! Resolution lifecycle:
//!
//! ```text
//! Detected → StrategySelected → ActionsGenerated → Implemented → Evaluated
//!                                      │
//!                                      └──────────→ Escalated (terminal)
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::node::NodeId;

/// Unique identifier for a [`Conflict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictId(pub Uuid);

impl ConflictId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a [`Resolution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolutionId(pub Uuid);

impl ResolutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ResolutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResolutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Kind of contention detected between nodes/domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictType {
    ResourceContention,
    TaskOverlap,
    PriorityMismatch,
    DependencyViolation,
    CapabilityDispute,
    PerformanceDegradation,
}

impl ConflictType {
    /// Base weight feeding the severity score.
    pub fn base_weight(&self) -> f64 {
        match self {
            ConflictType::ResourceContention => 4.0,
            ConflictType::TaskOverlap => 2.0,
            ConflictType::PriorityMismatch => 3.0,
            ConflictType::DependencyViolation => 5.0,
            ConflictType::CapabilityDispute => 2.5,
            ConflictType::PerformanceDegradation => 4.5,
        }
    }
}

/// Severity derived from the weighted conflict score; never stored
/// independently of the score that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ConflictSeverity {
    /// Map a weighted severity score onto the fixed tiers.
    pub fn from_score(score: f64) -> Self {
        if score >= 8.0 {
            ConflictSeverity::Critical
        } else if score >= 6.0 {
            ConflictSeverity::High
        } else if score >= 4.0 {
            ConflictSeverity::Medium
        } else {
            ConflictSeverity::Low
        }
    }
}

/// A detected contention between participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub id: ConflictId,
    pub conflict_type: ConflictType,
    pub severity: ConflictSeverity,
    pub participants: Vec<NodeId>,
    /// Labels of the contended resources (e.g. `"cpu"`, `"memory"`).
    pub resources: Vec<String>,
    pub description: String,
    /// Estimated impact on throughput in `[0, 1]`.
    pub impact: f64,
    pub detected_at: DateTime<Utc>,
}

/// Closed enumeration of resolution strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionStrategy {
    RoundRobin,
    PriorityBased,
    PerformanceBased,
    ResourceOptimization,
    DomainSpecialization,
    TemporalSeparation,
    Escalation,
}

impl ResolutionStrategy {
    /// Historical base success rate, used until live statistics accumulate.
    pub fn base_success_rate(&self) -> f64 {
        match self {
            ResolutionStrategy::RoundRobin => 0.75,
            ResolutionStrategy::PriorityBased => 0.80,
            ResolutionStrategy::PerformanceBased => 0.78,
            ResolutionStrategy::ResourceOptimization => 0.85,
            ResolutionStrategy::DomainSpecialization => 0.82,
            ResolutionStrategy::TemporalSeparation => 0.70,
            ResolutionStrategy::Escalation => 0.95,
        }
    }
}

/// What a single resolution action does to its target node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionKind {
    /// Re-enter the assignment pipeline for work held by the target.
    Reassign,
    /// Override queue priority for the target's active assignments.
    Reprioritize { new_priority: u8 },
    /// Delay new work on the target by the given amount.
    Throttle { delay_ms: u64 },
    /// Hand a contended resource to the target.
    Reallocate { resource: String },
    /// Grant the target an exclusive capability for the contended scope.
    Specialize { capability: String },
    /// Hand the conflict to the parent coordinator.
    Escalate,
}

/// One ordered step of a resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionAction {
    pub target: NodeId,
    pub kind: ActionKind,
    /// Whether the action can be rolled back after application.
    pub reversible: bool,
}

/// Prediction attached to a resolution before it is implemented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedOutcome {
    pub success_probability: f64,
    pub risk_factors: Vec<String>,
}

/// Resolution lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionState {
    Detected,
    StrategySelected,
    ActionsGenerated,
    Implemented,
    Evaluated,
    /// Terminal: no further automatic retries.
    Escalated,
}

/// The record of one resolution attempt, retained in bounded history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub id: ResolutionId,
    pub conflict_id: ConflictId,
    pub strategy: ResolutionStrategy,
    pub actions: Vec<ResolutionAction>,
    pub predicted: PredictedOutcome,
    pub state: ResolutionState,
    /// Measured post-hoc effectiveness in `[0, 1]`, filled at evaluation.
    pub effectiveness: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Forecast of an upcoming performance-degradation conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradationForecast {
    pub node: NodeId,
    /// Least-squares slope of the node's recent performance trend.
    pub slope: f64,
    pub severity: f64,
    /// Estimated time until the node crosses the degradation threshold.
    pub eta_ms: u64,
}

/// Seam through which resolution actions touch the rest of the swarm.
///
/// The resolver only sequences actions and handles rollback; the executor
/// owns the actual topology/assignment mutations.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn apply(&self, action: &ResolutionAction) -> Result<(), ResolutionError>;

    /// Undo a previously applied action. Only called for actions whose
    /// `reversible` flag is set.
    async fn rollback(&self, action: &ResolutionAction) -> Result<(), ResolutionError>;
}

/// Errors raised by conflict resolution.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("resolution of conflict {conflict} failed: {reason}")]
    Failed { conflict: ConflictId, reason: String },

    #[error("conflict not found: {0}")]
    ConflictNotFound(ConflictId),
}

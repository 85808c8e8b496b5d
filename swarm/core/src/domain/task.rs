// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task Distribution Aggregates
//!
//! Submitted tasks, their decomposed subtasks, the immutable
//! [`DistributionPlan`] binding them together, and the [`Assignment`] records
//! linking subtasks to hierarchy nodes.
//!
//! # Invariants
//!
//! - The prerequisite relation among subtasks of one decomposition is acyclic.
//! - At most one non-terminal [`Assignment`] exists per task id at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::node::NodeId;

/// Unique identifier for a task or subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a [`DistributionPlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanId(pub Uuid);

impl PlanId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for an [`Assignment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssignmentId(pub Uuid);

impl AssignmentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AssignmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AssignmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Closed set of coordination domains.
///
/// Unknown external labels map to [`TaskDomain::Generic`]; the per-domain
/// capability table below is the collective-exhaustiveness reference used by
/// MECE validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskDomain {
    Development,
    Quality,
    Architecture,
    Documentation,
    Research,
    Generic,
}

impl TaskDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskDomain::Development => "development",
            TaskDomain::Quality => "quality",
            TaskDomain::Architecture => "architecture",
            TaskDomain::Documentation => "documentation",
            TaskDomain::Research => "research",
            TaskDomain::Generic => "generic",
        }
    }

    /// Parse an external label, falling back to `Generic`.
    pub fn parse(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "development" | "dev" => TaskDomain::Development,
            "quality" | "qa" => TaskDomain::Quality,
            "architecture" => TaskDomain::Architecture,
            "documentation" | "docs" => TaskDomain::Documentation,
            "research" => TaskDomain::Research,
            _ => TaskDomain::Generic,
        }
    }

    /// Capabilities a complete decomposition in this domain must cover.
    pub fn required_capabilities(&self) -> &'static [&'static str] {
        match self {
            TaskDomain::Development => &["planning", "coding", "testing"],
            TaskDomain::Quality => &["testing", "review"],
            TaskDomain::Architecture => &["design", "review"],
            TaskDomain::Documentation => &["writing", "review"],
            TaskDomain::Research => &["analysis", "synthesis"],
            TaskDomain::Generic => &["execution"],
        }
    }

    /// Signal words used by the semantic-overlap bonus in MECE validation.
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            TaskDomain::Development => &["implement", "code", "build", "refactor", "fix"],
            TaskDomain::Quality => &["test", "verify", "validate", "coverage", "regression"],
            TaskDomain::Architecture => &["design", "structure", "interface", "boundary"],
            TaskDomain::Documentation => &["document", "describe", "guide", "reference"],
            TaskDomain::Research => &["investigate", "explore", "compare", "evaluate"],
            TaskDomain::Generic => &[],
        }
    }

    /// Per-domain decomposition limits; exceeding any of them forces
    /// decomposition regardless of the complexity score.
    pub fn decomposition_limits(&self) -> DomainLimits {
        match self {
            TaskDomain::Development => DomainLimits {
                max_files: 8,
                max_loc: 1_500,
                max_duration_ms: 4 * 3_600_000,
            },
            TaskDomain::Quality | TaskDomain::Architecture => DomainLimits {
                max_files: 12,
                max_loc: 2_500,
                max_duration_ms: 6 * 3_600_000,
            },
            _ => DomainLimits {
                max_files: 16,
                max_loc: 4_000,
                max_duration_ms: 8 * 3_600_000,
            },
        }
    }
}

impl fmt::Display for TaskDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decomposition thresholds for one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainLimits {
    pub max_files: usize,
    pub max_loc: u64,
    pub max_duration_ms: u64,
}

/// Scheduling priority tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PriorityTier {
    Low,
    Normal,
    High,
    Critical,
}

impl PriorityTier {
    /// Numeric weight used for queue ordering (higher is served first).
    pub fn weight(&self) -> u8 {
        match self {
            PriorityTier::Low => 1,
            PriorityTier::Normal => 2,
            PriorityTier::High => 3,
            PriorityTier::Critical => 4,
        }
    }
}

/// Resource footprint of a task or drone, in abstract units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ResourceFootprint {
    pub memory_mb: u64,
    pub cpu_cores: f64,
    pub network_mbps: u64,
    pub storage_mb: u64,
}

impl ResourceFootprint {
    /// Whether this footprint, read as available capacity, can take `demand`.
    /// A zero capacity dimension is undeclared and accepts any demand.
    pub fn accommodates(&self, demand: &ResourceFootprint) -> bool {
        fn fits(capacity: u64, demand: u64) -> bool {
            capacity == 0 || capacity >= demand
        }
        fits(self.memory_mb, demand.memory_mb)
            && (self.cpu_cores == 0.0 || self.cpu_cores >= demand.cpu_cores)
            && fits(self.network_mbps, demand.network_mbps)
            && fits(self.storage_mb, demand.storage_mb)
    }
}

/// An incoming work item as submitted by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    pub domain: TaskDomain,
    pub priority: PriorityTier,
    pub description: String,
    pub files: Vec<String>,
    pub estimated_loc: u64,
    pub estimated_duration_ms: u64,
    pub required_capabilities: BTreeSet<String>,
    pub dependencies: Vec<TaskId>,
    pub footprint: ResourceFootprint,
}

impl TaskSpec {
    pub fn new(domain: TaskDomain, description: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            domain,
            priority: PriorityTier::Normal,
            description: description.into(),
            files: Vec::new(),
            estimated_loc: 0,
            estimated_duration_ms: 60_000,
            required_capabilities: BTreeSet::new(),
            dependencies: Vec::new(),
            footprint: ResourceFootprint::default(),
        }
    }

    pub fn with_priority(mut self, priority: PriorityTier) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }

    pub fn with_estimated_loc(mut self, loc: u64) -> Self {
        self.estimated_loc = loc;
        self
    }

    pub fn with_estimated_duration_ms(mut self, ms: u64) -> Self {
        self.estimated_duration_ms = ms;
        self
    }

    pub fn with_capabilities<I: IntoIterator<Item = S>, S: Into<String>>(
        mut self,
        caps: I,
    ) -> Self {
        self.required_capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<TaskId>) -> Self {
        self.dependencies = deps;
        self
    }
}

/// One unit of a decomposed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    pub id: TaskId,
    pub parent: TaskId,
    pub domain: TaskDomain,
    pub priority: PriorityTier,
    pub description: String,
    pub estimated_duration_ms: u64,
    pub required_capabilities: BTreeSet<String>,
    /// Subtask ids (within the same decomposition) that must complete first.
    pub prerequisites: Vec<TaskId>,
    pub footprint: ResourceFootprint,
}

/// Kind of a dependency edge between two subtasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependencyKind {
    /// Strict ordering: the target may not start before the source completes.
    Sequence,
    /// The target consumes an artifact produced by the source.
    DataFlow,
}

/// Directed dependency edge: `from` must complete before `to` starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: TaskId,
    pub to: TaskId,
    pub kind: DependencyKind,
}

/// Lifecycle of an [`Assignment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssignmentStatus {
    /// Created; waiting on prerequisites.
    Pending,
    /// Ready and bound to an assignee.
    Assigned,
    InProgress,
    Completed,
    Failed,
    /// Superseded by a newer assignment; retained for audit.
    Reassigned,
}

impl AssignmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AssignmentStatus::Completed | AssignmentStatus::Failed | AssignmentStatus::Reassigned
        )
    }
}

/// Links a (sub)task to an assignee node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub task_id: TaskId,
    pub assignee: NodeId,
    pub status: AssignmentStatus,
    /// Numeric priority used for queue ordering (from [`PriorityTier::weight`]).
    pub priority: u8,
    pub assigned_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Assignment {
    pub fn new(task_id: TaskId, assignee: NodeId, priority: u8) -> Self {
        let now = Utc::now();
        Self {
            id: AssignmentId::new(),
            task_id,
            assignee,
            status: AssignmentStatus::Pending,
            priority,
            assigned_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Immutable record binding one original task to its decomposition.
///
/// Created once per submitted task and retained until all subtasks resolve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionPlan {
    pub id: PlanId,
    pub task_id: TaskId,
    pub subtasks: Vec<SubTask>,
    pub dependencies: Vec<DependencyEdge>,
    /// Critical-path length through the dependency DAG, in milliseconds.
    pub estimated_completion_ms: u64,
    /// Whether at least two subtasks can run concurrently.
    pub parallelizable: bool,
    pub created_at: DateTime<Utc>,
}

impl DistributionPlan {
    pub fn subtask(&self, id: TaskId) -> Option<&SubTask> {
        self.subtasks.iter().find(|s| s.id == id)
    }
}

/// Errors raised by task distribution.
#[derive(Debug, Error)]
pub enum DistributionError {
    #[error("decomposition failed: {0}")]
    Decomposition(String),

    /// Fatal: the dependency graph contains a cycle through the named task.
    #[error("dependency cycle detected at task {0}")]
    CycleDetected(TaskId),

    #[error("no candidate assignee for task {0}")]
    NoCandidate(TaskId),

    #[error("assignment failed for task {task}: {reason}")]
    AssignmentFailed { task: TaskId, reason: String },

    #[error("plan not found: {0}")]
    PlanNotFound(PlanId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_parse_fallback() {
        assert_eq!(TaskDomain::parse("Development"), TaskDomain::Development);
        assert_eq!(TaskDomain::parse("qa"), TaskDomain::Quality);
        assert_eq!(TaskDomain::parse("martian"), TaskDomain::Generic);
    }

    #[test]
    fn test_priority_weight_ordering() {
        assert!(PriorityTier::Critical.weight() > PriorityTier::High.weight());
        assert!(PriorityTier::High.weight() > PriorityTier::Normal.weight());
        assert!(PriorityTier::Normal.weight() > PriorityTier::Low.weight());
    }

    #[test]
    fn test_footprint_capacity_fit() {
        let capacity = ResourceFootprint {
            memory_mb: 4_096,
            cpu_cores: 2.0,
            network_mbps: 0,
            storage_mb: 1_024,
        };
        let demand = ResourceFootprint {
            memory_mb: 2_048,
            cpu_cores: 1.0,
            network_mbps: 100,
            storage_mb: 512,
        };
        // Undeclared network capacity accepts any network demand.
        assert!(capacity.accommodates(&demand));
        assert!(!ResourceFootprint {
            memory_mb: 512,
            ..capacity
        }
        .accommodates(&demand));
        // An undeclared footprint accepts everything.
        assert!(ResourceFootprint::default().accommodates(&demand));
    }

    #[test]
    fn test_assignment_terminal_states() {
        let mut a = Assignment::new(TaskId::new(), NodeId::new(), 2);
        assert!(!a.is_terminal());
        a.status = AssignmentStatus::Reassigned;
        assert!(a.is_terminal());
        a.status = AssignmentStatus::InProgress;
        assert!(!a.is_terminal());
    }

    #[test]
    fn test_plan_serialization_round_trip() {
        let task = TaskId::new();
        let sub = SubTask {
            id: TaskId::new(),
            parent: task,
            domain: TaskDomain::Development,
            priority: PriorityTier::Normal,
            description: "implement parser".to_string(),
            estimated_duration_ms: 1_000,
            required_capabilities: ["coding".to_string()].into_iter().collect(),
            prerequisites: vec![],
            footprint: ResourceFootprint::default(),
        };
        let plan = DistributionPlan {
            id: PlanId::new(),
            task_id: task,
            subtasks: vec![sub],
            dependencies: vec![],
            estimated_completion_ms: 1_000,
            parallelizable: false,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&plan).unwrap();
        let back: DistributionPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back.task_id, task);
        assert_eq!(back.subtasks.len(), 1);
    }
}

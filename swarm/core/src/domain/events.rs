// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain events emitted by the coordination core for external observers
//! (dashboards, loggers). Published through the engine's event bus; payloads
//! are serializable snapshots, never live references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::conflict::{ConflictId, ConflictSeverity, ConflictType, ResolutionStrategy};
use crate::domain::drone::{DroneId, PoolId};
use crate::domain::node::{NodeId, NodeKind, NodeStatus};
use crate::domain::task::{AssignmentId, PlanId, TaskDomain, TaskId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TopologyEvent {
    NodeAdded {
        node_id: NodeId,
        kind: NodeKind,
        domain: TaskDomain,
        parent: Option<NodeId>,
        added_at: DateTime<Utc>,
    },
    NodeRemoved {
        node_id: NodeId,
        reattached_children: usize,
        removed_at: DateTime<Utc>,
    },
    NodeStatusChanged {
        node_id: NodeId,
        from: NodeStatus,
        to: NodeStatus,
        changed_at: DateTime<Utc>,
    },
    NodeLoadChanged {
        node_id: NodeId,
        load: f64,
        capacity: f64,
        changed_at: DateTime<Utc>,
    },
    LoadRedistributed {
        failed_node: NodeId,
        siblings: Vec<NodeId>,
        per_sibling: f64,
        redistributed_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DroneEvent {
    DroneSpawned {
        drone_id: DroneId,
        pool_id: PoolId,
        worker_type: String,
        spawned_at: DateTime<Utc>,
    },
    DroneAssigned {
        drone_id: DroneId,
        pool_id: PoolId,
        assigned_at: DateTime<Utc>,
    },
    DroneReturned {
        drone_id: DroneId,
        pool_id: PoolId,
        success: bool,
        returned_at: DateTime<Utc>,
    },
    DroneTerminated {
        drone_id: DroneId,
        pool_id: PoolId,
        reason: String,
        terminated_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssignmentEvent {
    AssignmentExecuted {
        assignment_id: AssignmentId,
        task_id: TaskId,
        assignee: NodeId,
        executed_at: DateTime<Utc>,
    },
    AssignmentCompleted {
        assignment_id: AssignmentId,
        task_id: TaskId,
        completed_at: DateTime<Utc>,
    },
    AssignmentFailed {
        assignment_id: AssignmentId,
        task_id: TaskId,
        reason: String,
        failed_at: DateTime<Utc>,
    },
    AssignmentReassigned {
        task_id: TaskId,
        from: NodeId,
        to: NodeId,
        reason: String,
        reassigned_at: DateTime<Utc>,
    },
    PlanCreated {
        plan_id: PlanId,
        task_id: TaskId,
        subtask_count: usize,
        estimated_completion_ms: u64,
        created_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConflictEvent {
    ConflictDetected {
        conflict_id: ConflictId,
        conflict_type: ConflictType,
        severity: ConflictSeverity,
        participants: Vec<NodeId>,
        detected_at: DateTime<Utc>,
    },
    ConflictResolved {
        conflict_id: ConflictId,
        strategy: ResolutionStrategy,
        resolved_at: DateTime<Utc>,
    },
    ConflictEscalated {
        conflict_id: ConflictId,
        reason: String,
        escalated_at: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_event_serialization() {
        let event = TopologyEvent::NodeStatusChanged {
            node_id: NodeId::new(),
            from: NodeStatus::Active,
            to: NodeStatus::Degraded,
            changed_at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("NodeStatusChanged"));
        assert!(json.contains("Degraded"));
    }

    #[test]
    fn test_conflict_event_round_trip() {
        let id = ConflictId::new();
        let event = ConflictEvent::ConflictDetected {
            conflict_id: id,
            conflict_type: ConflictType::ResourceContention,
            severity: ConflictSeverity::High,
            participants: vec![NodeId::new(), NodeId::new()],
            detected_at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: ConflictEvent = serde_json::from_str(&json).unwrap();
        match back {
            ConflictEvent::ConflictDetected { conflict_id, .. } => assert_eq!(conflict_id, id),
            _ => panic!("unexpected variant"),
        }
    }
}

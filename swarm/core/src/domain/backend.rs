// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! External ports consumed by the coordination core.
//!
//! The agent execution backend is an opaque, possibly slow, possibly failing
//! dependency; the distributor wraps every call with its reassignment/retry
//! policy. The telemetry source feeds periodic load readings into the
//! topology and the resolver's performance history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::node::NodeId;
use crate::domain::task::SubTask;

/// Result of executing one subtask payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub output: serde_json::Value,
    pub duration_ms: u64,
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("execution failed: {0}")]
    Failed(String),

    #[error("execution rejected: {0}")]
    Rejected(String),

    #[error("execution timed out after {0}ms")]
    Timeout(u64),
}

/// Executes a subtask's payload. Internals (model selection, external
/// processes) are opaque to the coordination core.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn execute(&self, subtask: &SubTask) -> Result<ExecutionResult, ExecutionError>;
}

/// One periodic load/performance reading for a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadReading {
    pub node: NodeId,
    /// Load delta since the previous reading, in topology units.
    pub load_delta: f64,
    /// Normalized performance score in `[0, 1]`.
    pub performance: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Supplies periodic load/resource readings.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn sample(&self) -> Vec<LoadReading>;
}

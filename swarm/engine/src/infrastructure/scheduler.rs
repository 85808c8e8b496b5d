// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Periodic maintenance loops for the coordination core.
//!
//! Each concern runs on its own tokio interval, all guarded by one
//! cancellation token so shutdown is a single cancel-and-join. Tick bodies
//! are synchronous state passes; nothing here holds work across an await.

use std::sync::Arc;
use std::time::Duration;

use aegis_swarm_core::domain::backend::TelemetrySource;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::application::SwarmCoordinator;

pub struct CoordinationScheduler {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl CoordinationScheduler {
    /// Spawn the maintenance loops: topology staleness checks, pool health
    /// and autoscaling, resolution evaluation, and (when a source is given)
    /// telemetry polling.
    pub fn start(
        coordinator: Arc<SwarmCoordinator>,
        telemetry: Option<Arc<dyn TelemetrySource>>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let config = coordinator.config().clone();
        let mut handles = Vec::new();

        handles.push(Self::spawn_loop(
            cancel.clone(),
            config.topology.health_check_interval_ms,
            "topology-health",
            {
                let coordinator = coordinator.clone();
                move || {
                    coordinator.topology().health_check_tick(Utc::now());
                }
            },
        ));

        handles.push(Self::spawn_loop(
            cancel.clone(),
            config.pools.health_interval_ms,
            "pool-health",
            {
                let coordinator = coordinator.clone();
                move || {
                    coordinator.pools().health_tick(Utc::now());
                }
            },
        ));

        handles.push(Self::spawn_loop(
            cancel.clone(),
            config.pools.autoscale_interval_ms,
            "pool-autoscale",
            {
                let coordinator = coordinator.clone();
                move || coordinator.pools().autoscale_tick()
            },
        ));

        handles.push(Self::spawn_loop(
            cancel.clone(),
            config.resolver.evaluation_delay_ms,
            "resolution-evaluation",
            {
                let coordinator = coordinator.clone();
                move || {
                    coordinator.resolver().evaluation_tick(Utc::now());
                    coordinator.degradation_sweep();
                }
            },
        ));

        if let Some(source) = telemetry {
            let token = cancel.clone();
            let interval_ms = config.topology.health_check_interval_ms;
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = interval.tick() => {
                            let readings = source.sample().await;
                            debug!(readings = readings.len(), "telemetry polled");
                            coordinator.apply_telemetry(&readings);
                        }
                    }
                }
            }));
        }

        info!(loops = handles.len(), "coordination scheduler started");
        Self { cancel, handles }
    }

    fn spawn_loop(
        token: CancellationToken,
        interval_ms: u64,
        name: &'static str,
        mut tick: impl FnMut() + Send + 'static,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(name, "maintenance loop stopped");
                        break;
                    }
                    _ = interval.tick() => tick(),
                }
            }
        })
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Cancel every loop and wait for the tasks to drain.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("coordination scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_swarm_core::domain::backend::{
        ExecutionBackend, ExecutionError, ExecutionResult, LoadReading,
    };
    use aegis_swarm_core::domain::config::CoordinationConfig;
    use aegis_swarm_core::domain::node::NodeKind;
    use aegis_swarm_core::domain::task::{SubTask, TaskDomain};
    use async_trait::async_trait;
    use std::collections::BTreeSet;

    struct OkBackend;

    #[async_trait]
    impl ExecutionBackend for OkBackend {
        async fn execute(&self, _subtask: &SubTask) -> Result<ExecutionResult, ExecutionError> {
            Ok(ExecutionResult {
                output: serde_json::Value::Null,
                duration_ms: 1,
            })
        }
    }

    struct StaticTelemetry {
        node: aegis_swarm_core::domain::node::NodeId,
    }

    #[async_trait]
    impl TelemetrySource for StaticTelemetry {
        async fn sample(&self) -> Vec<LoadReading> {
            vec![LoadReading {
                node: self.node,
                load_delta: 1.0,
                performance: 0.9,
                recorded_at: Utc::now(),
            }]
        }
    }

    #[tokio::test]
    async fn test_scheduler_starts_and_shuts_down() {
        let coordinator = Arc::new(SwarmCoordinator::new(
            Arc::new(OkBackend),
            CoordinationConfig::default(),
        ));
        let scheduler = CoordinationScheduler::start(coordinator, None);
        assert!(scheduler.is_running());
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_telemetry_loop_feeds_coordinator() {
        let mut config = CoordinationConfig::default();
        config.topology.health_check_interval_ms = 5;

        let coordinator = Arc::new(SwarmCoordinator::new(Arc::new(OkBackend), config));
        let node = coordinator
            .topology()
            .add_node(
                NodeKind::Root,
                TaskDomain::Generic,
                None,
                100.0,
                BTreeSet::new(),
            )
            .unwrap();

        let scheduler = CoordinationScheduler::start(
            coordinator.clone(),
            Some(Arc::new(StaticTelemetry { node })),
        );
        tokio::time::sleep(Duration::from_millis(40)).await;
        scheduler.shutdown().await;

        assert!(coordinator.topology().node(node).unwrap().load > 0.0);
    }
}

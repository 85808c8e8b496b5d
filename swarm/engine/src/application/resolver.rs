// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Conflict Resolver
//!
//! Detects contention between hierarchy nodes, scores its severity, selects
//! a resolution strategy from the severity/type table, and drives the
//! generated actions through the [`ActionExecutor`] seam with rollback on
//! partial failure. Implemented resolutions are measured after a delay
//! against the participants' recorded performance, and the per-strategy
//! success statistics feed back into outcome prediction.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use aegis_swarm_core::domain::config::ResolverConfig;
use aegis_swarm_core::domain::conflict::{
    ActionExecutor, ActionKind, Conflict, ConflictId, ConflictSeverity, ConflictType,
    DegradationForecast, PredictedOutcome, Resolution, ResolutionAction, ResolutionError,
    ResolutionId, ResolutionState, ResolutionStrategy,
};
use aegis_swarm_core::domain::events::ConflictEvent;
use aegis_swarm_core::domain::node::NodeId;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::application::topology::HierarchyTopology;
use crate::infrastructure::EventBus;

/// Performance assumed for a node with no recorded samples.
const NEUTRAL_PERFORMANCE: f64 = 0.5;

/// Attempts required before live statistics replace the base success rate.
const MIN_ATTEMPTS_FOR_LIVE_RATE: u64 = 5;

#[derive(Debug, Clone, Copy, Default)]
struct StrategyStats {
    attempts: u64,
    successes: u64,
}

impl StrategyStats {
    fn rate(&self) -> Option<f64> {
        if self.attempts >= MIN_ATTEMPTS_FOR_LIVE_RATE {
            Some(self.successes as f64 / self.attempts as f64)
        } else {
            None
        }
    }
}

/// An implemented resolution awaiting its effectiveness measurement.
#[derive(Debug, Clone)]
struct PendingEvaluation {
    resolution_id: ResolutionId,
    strategy: ResolutionStrategy,
    participants: Vec<NodeId>,
    /// Mean participant performance at implementation time.
    baseline: f64,
    due_at: DateTime<Utc>,
}

/// Aggregate view over the resolver's bounded history.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverStatistics {
    pub total_resolutions: usize,
    pub evaluated: usize,
    pub escalated: usize,
    pub average_effectiveness: f64,
}

#[derive(Default)]
struct ResolverState {
    conflicts: HashMap<ConflictId, Conflict>,
    history: VecDeque<Resolution>,
    stats: HashMap<ResolutionStrategy, StrategyStats>,
    performance: HashMap<NodeId, VecDeque<f64>>,
    pending: Vec<PendingEvaluation>,
    rr_cursor: usize,
}

pub struct ConflictResolver {
    topology: Arc<HierarchyTopology>,
    executor: Arc<dyn ActionExecutor>,
    events: EventBus,
    config: ResolverConfig,
    state: Mutex<ResolverState>,
}

impl ConflictResolver {
    pub fn new(
        topology: Arc<HierarchyTopology>,
        executor: Arc<dyn ActionExecutor>,
        events: EventBus,
        config: ResolverConfig,
    ) -> Self {
        Self {
            topology,
            executor,
            events,
            config,
            state: Mutex::new(ResolverState::default()),
        }
    }

    /// Register a conflict: score it, tier the severity, and publish the
    /// detection event. Returns the stored record.
    pub fn detect_conflict(
        &self,
        conflict_type: ConflictType,
        participants: Vec<NodeId>,
        resources: Vec<String>,
        description: impl Into<String>,
    ) -> Conflict {
        let score = Self::severity_score(conflict_type, &participants, &resources);
        let conflict = Conflict {
            id: ConflictId::new(),
            conflict_type,
            severity: ConflictSeverity::from_score(score),
            participants,
            resources,
            description: description.into(),
            impact: (score / 10.0).clamp(0.0, 1.0),
            detected_at: Utc::now(),
        };

        info!(
            conflict = %conflict.id,
            ?conflict_type,
            severity = ?conflict.severity,
            participants = conflict.participants.len(),
            "conflict detected"
        );
        metrics::counter!("aegis_swarm_conflicts_detected").increment(1);
        self.events
            .publish_conflict_event(ConflictEvent::ConflictDetected {
                conflict_id: conflict.id,
                conflict_type,
                severity: conflict.severity,
                participants: conflict.participants.clone(),
                detected_at: conflict.detected_at,
            });

        self.state
            .lock()
            .conflicts
            .insert(conflict.id, conflict.clone());
        conflict
    }

    /// Weighted severity score: type base weight, half a point per
    /// participant, a full point per compute-critical resource.
    fn severity_score(
        conflict_type: ConflictType,
        participants: &[NodeId],
        resources: &[String],
    ) -> f64 {
        let compute = resources
            .iter()
            .filter(|r| r.as_str() == "cpu" || r.as_str() == "memory")
            .count();
        conflict_type.base_weight() + 0.5 * participants.len() as f64 + compute as f64
    }

    /// Severity/type table mapping a conflict to its resolution strategy.
    pub fn select_strategy(&self, conflict: &Conflict) -> ResolutionStrategy {
        match (conflict.conflict_type, conflict.severity) {
            (ConflictType::ResourceContention, ConflictSeverity::Critical)
            | (ConflictType::ResourceContention, ConflictSeverity::High) => {
                ResolutionStrategy::ResourceOptimization
            }
            (ConflictType::ResourceContention, ConflictSeverity::Medium) => {
                ResolutionStrategy::PriorityBased
            }
            (ConflictType::ResourceContention, ConflictSeverity::Low) => {
                ResolutionStrategy::RoundRobin
            }
            (ConflictType::TaskOverlap, _) => ResolutionStrategy::DomainSpecialization,
            (ConflictType::PriorityMismatch, _) => ResolutionStrategy::PriorityBased,
            (ConflictType::DependencyViolation, _) => ResolutionStrategy::TemporalSeparation,
            (ConflictType::CapabilityDispute, _) => ResolutionStrategy::PerformanceBased,
            (ConflictType::PerformanceDegradation, ConflictSeverity::Critical) => {
                ResolutionStrategy::Escalation
            }
            (ConflictType::PerformanceDegradation, _) => ResolutionStrategy::PerformanceBased,
        }
    }

    /// Generate the ordered action list for a strategy.
    pub fn generate_actions(
        &self,
        conflict: &Conflict,
        strategy: ResolutionStrategy,
    ) -> Vec<ResolutionAction> {
        let participants = &conflict.participants;
        if participants.is_empty() {
            return Vec::new();
        }

        match strategy {
            ResolutionStrategy::RoundRobin => {
                // Rotate which participant gives up its contested work.
                let idx = {
                    let mut state = self.state.lock();
                    let idx = state.rr_cursor % participants.len();
                    state.rr_cursor += 1;
                    idx
                };
                vec![Self::action(participants[idx], ActionKind::Reassign)]
            }
            ResolutionStrategy::PriorityBased => {
                // Highest tier to the first participant, descending after.
                participants
                    .iter()
                    .enumerate()
                    .map(|(i, p)| {
                        let new_priority = 4u8.saturating_sub(i as u8).max(1);
                        Self::action(*p, ActionKind::Reprioritize { new_priority })
                    })
                    .collect()
            }
            ResolutionStrategy::PerformanceBased => {
                let worst = self.worst_performer(participants);
                vec![Self::action(worst, ActionKind::Reassign)]
            }
            ResolutionStrategy::ResourceOptimization => {
                let best = self.least_loaded(participants);
                let mut actions: Vec<ResolutionAction> = conflict
                    .resources
                    .iter()
                    .map(|r| {
                        Self::action(
                            best,
                            ActionKind::Reallocate {
                                resource: r.clone(),
                            },
                        )
                    })
                    .collect();
                for p in participants.iter().filter(|p| **p != best) {
                    actions.push(Self::action(
                        *p,
                        ActionKind::Throttle {
                            delay_ms: self.config.stagger_delay_ms,
                        },
                    ));
                }
                actions
            }
            ResolutionStrategy::DomainSpecialization => participants
                .iter()
                .map(|p| {
                    let capability = self
                        .topology
                        .node(*p)
                        .map(|n| n.domain.as_str().to_string())
                        .unwrap_or_else(|| "generic".to_string());
                    Self::action(*p, ActionKind::Specialize { capability })
                })
                .collect(),
            ResolutionStrategy::TemporalSeparation => participants
                .iter()
                .enumerate()
                .skip(1)
                .map(|(i, p)| {
                    Self::action(
                        *p,
                        ActionKind::Throttle {
                            delay_ms: i as u64 * self.config.stagger_delay_ms,
                        },
                    )
                })
                .collect(),
            ResolutionStrategy::Escalation => {
                vec![Self::action(participants[0], ActionKind::Escalate)]
            }
        }
    }

    fn action(target: NodeId, kind: ActionKind) -> ResolutionAction {
        let reversible = match kind {
            ActionKind::Reassign | ActionKind::Escalate => false,
            ActionKind::Reprioritize { .. }
            | ActionKind::Throttle { .. }
            | ActionKind::Reallocate { .. }
            | ActionKind::Specialize { .. } => true,
        };
        ResolutionAction {
            target,
            kind,
            reversible,
        }
    }

    /// Predicted success: the live per-strategy rate once enough attempts
    /// exist, else the strategy's base rate, discounted per action.
    pub fn predict_outcome(
        &self,
        conflict: &Conflict,
        strategy: ResolutionStrategy,
        action_count: usize,
    ) -> PredictedOutcome {
        let base = {
            let state = self.state.lock();
            state
                .stats
                .get(&strategy)
                .and_then(|s| s.rate())
                .unwrap_or_else(|| strategy.base_success_rate())
        };
        let probability = (base - self.config.complexity_penalty_per_action * action_count as f64)
            .clamp(0.05, 0.99);

        let mut risk_factors = Vec::new();
        if conflict.severity == ConflictSeverity::Critical {
            risk_factors.push("critical severity".to_string());
        }
        if action_count > 3 {
            risk_factors.push(format!("{action_count} actions to sequence"));
        }
        if base < 0.75 {
            risk_factors.push("weak historical success for strategy".to_string());
        }
        PredictedOutcome {
            success_probability: probability,
            risk_factors,
        }
    }

    /// Run the full resolution pipeline for a detected conflict.
    ///
    /// Actions are applied in order; the first failure rolls back every
    /// already-applied reversible action in reverse order and escalates the
    /// conflict instead. The returned record is also appended to history.
    ///
    /// # Errors
    ///
    /// `ConflictNotFound` when the id was never detected (or already
    /// resolved).
    pub async fn resolve_conflict(
        &self,
        conflict_id: ConflictId,
    ) -> Result<Resolution, ResolutionError> {
        let conflict = self
            .state
            .lock()
            .conflicts
            .get(&conflict_id)
            .cloned()
            .ok_or(ResolutionError::ConflictNotFound(conflict_id))?;

        let strategy = self.select_strategy(&conflict);
        let actions = self.generate_actions(&conflict, strategy);
        let predicted = self.predict_outcome(&conflict, strategy, actions.len());
        debug!(
            conflict = %conflict_id,
            ?strategy,
            actions = actions.len(),
            predicted = predicted.success_probability,
            "resolution planned"
        );

        let mut resolution = Resolution {
            id: ResolutionId::new(),
            conflict_id,
            strategy,
            actions: actions.clone(),
            predicted,
            state: ResolutionState::ActionsGenerated,
            effectiveness: None,
            created_at: Utc::now(),
        };

        let mut applied: Vec<ResolutionAction> = Vec::new();
        let mut failure: Option<ResolutionError> = None;
        for action in &actions {
            match self.executor.apply(action).await {
                Ok(()) => applied.push(action.clone()),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(err) = failure {
            warn!(conflict = %conflict_id, error = %err, "resolution failed; rolling back");
            for action in applied.iter().rev().filter(|a| a.reversible) {
                if let Err(e) = self.executor.rollback(action).await {
                    warn!(conflict = %conflict_id, error = %e, "rollback step failed");
                }
            }
            resolution.state = ResolutionState::Escalated;
            self.record_attempt(strategy, false);
            self.events
                .publish_conflict_event(ConflictEvent::ConflictEscalated {
                    conflict_id,
                    reason: err.to_string(),
                    escalated_at: Utc::now(),
                });
        } else if strategy == ResolutionStrategy::Escalation {
            // Hand-off to the parent coordinator is terminal for this tier.
            resolution.state = ResolutionState::Escalated;
            self.record_attempt(strategy, true);
            self.events
                .publish_conflict_event(ConflictEvent::ConflictEscalated {
                    conflict_id,
                    reason: conflict.description.clone(),
                    escalated_at: Utc::now(),
                });
        } else {
            resolution.state = ResolutionState::Implemented;
            let baseline = self.mean_performance(&conflict.participants);
            let mut state = self.state.lock();
            state.pending.push(PendingEvaluation {
                resolution_id: resolution.id,
                strategy,
                participants: conflict.participants.clone(),
                baseline,
                due_at: Utc::now() + Duration::milliseconds(self.config.evaluation_delay_ms as i64),
            });
            drop(state);
            info!(conflict = %conflict_id, ?strategy, "resolution implemented");
            metrics::counter!("aegis_swarm_conflicts_resolved").increment(1);
            self.events
                .publish_conflict_event(ConflictEvent::ConflictResolved {
                    conflict_id,
                    strategy,
                    resolved_at: Utc::now(),
                });
        }

        let mut state = self.state.lock();
        state.conflicts.remove(&conflict_id);
        state.history.push_back(resolution.clone());
        while state.history.len() > self.config.history_limit {
            state.history.pop_front();
        }
        Ok(resolution)
    }

    fn record_attempt(&self, strategy: ResolutionStrategy, success: bool) {
        let mut state = self.state.lock();
        let stats = state.stats.entry(strategy).or_default();
        stats.attempts += 1;
        if success {
            stats.successes += 1;
        }
    }

    /// Evaluate implemented resolutions whose delay has elapsed:
    /// effectiveness is the shift of mean participant performance against
    /// the baseline captured at implementation, centered on 0.5. Returns the
    /// number of resolutions evaluated.
    pub fn evaluation_tick(&self, now: DateTime<Utc>) -> usize {
        let due: Vec<PendingEvaluation> = {
            let mut state = self.state.lock();
            let (due, remaining) = state
                .pending
                .drain(..)
                .partition(|p| p.due_at <= now);
            state.pending = remaining;
            due
        };

        for pending in &due {
            let after = self.mean_performance(&pending.participants);
            let effectiveness = (NEUTRAL_PERFORMANCE + (after - pending.baseline)).clamp(0.0, 1.0);
            let success = effectiveness >= NEUTRAL_PERFORMANCE;
            debug!(
                resolution = %pending.resolution_id,
                baseline = pending.baseline,
                after,
                effectiveness,
                "resolution evaluated"
            );

            self.record_attempt(pending.strategy, success);
            let mut state = self.state.lock();
            if let Some(entry) = state
                .history
                .iter_mut()
                .find(|r| r.id == pending.resolution_id)
            {
                entry.effectiveness = Some(effectiveness);
                entry.state = ResolutionState::Evaluated;
            }
        }
        due.len()
    }

    /// Fold one performance sample into a node's bounded rolling window.
    pub fn record_performance(&self, node: NodeId, score: f64) {
        let mut state = self.state.lock();
        let window = state.performance.entry(node).or_default();
        window.push_back(score.clamp(0.0, 1.0));
        while window.len() > self.config.performance_window {
            window.pop_front();
        }
    }

    /// Least-squares trend over each node's window; nodes whose slope falls
    /// below the threshold with sufficient projected severity are forecast
    /// as upcoming performance-degradation conflicts.
    pub fn predict_degradation(&self) -> Vec<DegradationForecast> {
        let state = self.state.lock();
        let mut forecasts = Vec::new();

        for (node, window) in &state.performance {
            if window.len() < 5 {
                continue;
            }
            let slope = Self::least_squares_slope(window);
            if slope >= self.config.degradation_slope_threshold {
                continue;
            }
            let last = *window.back().unwrap_or(&NEUTRAL_PERFORMANCE);
            let severity = (slope.abs() * 10.0 + (1.0 - last)).clamp(0.0, 1.0);
            if severity <= self.config.degradation_severity_threshold {
                continue;
            }
            // Samples arrive one per health interval; project time until the
            // trend crosses the neutral line.
            let steps = ((last - NEUTRAL_PERFORMANCE) / -slope).max(0.0);
            let eta_ms = (steps * 1_000.0) as u64;
            forecasts.push(DegradationForecast {
                node: *node,
                slope,
                severity,
                eta_ms,
            });
        }
        forecasts
    }

    fn least_squares_slope(window: &VecDeque<f64>) -> f64 {
        let n = window.len() as f64;
        let mean_x = (n - 1.0) / 2.0;
        let mean_y = window.iter().sum::<f64>() / n;
        let mut num = 0.0;
        let mut den = 0.0;
        for (i, y) in window.iter().enumerate() {
            let dx = i as f64 - mean_x;
            num += dx * (y - mean_y);
            den += dx * dx;
        }
        if den == 0.0 {
            0.0
        } else {
            num / den
        }
    }

    fn mean_performance(&self, participants: &[NodeId]) -> f64 {
        let state = self.state.lock();
        let mut sum = 0.0;
        let mut count = 0usize;
        for p in participants {
            if let Some(window) = state.performance.get(p) {
                if !window.is_empty() {
                    sum += window.iter().sum::<f64>() / window.len() as f64;
                    count += 1;
                }
            }
        }
        if count == 0 {
            NEUTRAL_PERFORMANCE
        } else {
            sum / count as f64
        }
    }

    fn worst_performer(&self, participants: &[NodeId]) -> NodeId {
        let state = self.state.lock();
        *participants
            .iter()
            .min_by(|a, b| {
                let pa = Self::window_mean(state.performance.get(a));
                let pb = Self::window_mean(state.performance.get(b));
                pa.total_cmp(&pb)
            })
            .expect("participants checked non-empty")
    }

    fn least_loaded(&self, participants: &[NodeId]) -> NodeId {
        *participants
            .iter()
            .min_by(|a, b| {
                let la = self.topology.node(**a).map(|n| n.load).unwrap_or(f64::MAX);
                let lb = self.topology.node(**b).map(|n| n.load).unwrap_or(f64::MAX);
                la.total_cmp(&lb)
            })
            .expect("participants checked non-empty")
    }

    fn window_mean(window: Option<&VecDeque<f64>>) -> f64 {
        match window {
            Some(w) if !w.is_empty() => w.iter().sum::<f64>() / w.len() as f64,
            _ => NEUTRAL_PERFORMANCE,
        }
    }

    pub fn active_conflicts(&self) -> Vec<Conflict> {
        self.state.lock().conflicts.values().cloned().collect()
    }

    pub fn history(&self) -> Vec<Resolution> {
        self.state.lock().history.iter().cloned().collect()
    }

    pub fn pending_evaluations(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn statistics(&self) -> ResolverStatistics {
        let state = self.state.lock();
        let evaluated: Vec<f64> = state
            .history
            .iter()
            .filter_map(|r| r.effectiveness)
            .collect();
        ResolverStatistics {
            total_resolutions: state.history.len(),
            evaluated: evaluated.len(),
            escalated: state
                .history
                .iter()
                .filter(|r| r.state == ResolutionState::Escalated)
                .count(),
            average_effectiveness: if evaluated.is_empty() {
                0.0
            } else {
                evaluated.iter().sum::<f64>() / evaluated.len() as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{EventBus, InMemoryNodeRepository};
    use aegis_swarm_core::domain::config::TopologyConfig;
    use aegis_swarm_core::domain::node::NodeKind;
    use aegis_swarm_core::domain::task::TaskDomain;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Executor that records calls and fails after `fail_after` applications.
    #[derive(Default)]
    struct RecordingExecutor {
        fail_after: Option<u32>,
        applied: Mutex<Vec<ResolutionAction>>,
        rolled_back: Mutex<Vec<ResolutionAction>>,
        calls: AtomicU32,
    }

    impl RecordingExecutor {
        fn failing_after(n: u32) -> Self {
            Self {
                fail_after: Some(n),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ActionExecutor for RecordingExecutor {
        async fn apply(&self, action: &ResolutionAction) -> Result<(), ResolutionError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(limit) = self.fail_after {
                if call >= limit {
                    return Err(ResolutionError::Failed {
                        conflict: ConflictId::new(),
                        reason: "executor rejected action".to_string(),
                    });
                }
            }
            self.applied.lock().push(action.clone());
            Ok(())
        }

        async fn rollback(&self, action: &ResolutionAction) -> Result<(), ResolutionError> {
            self.rolled_back.lock().push(action.clone());
            Ok(())
        }
    }

    struct Fixture {
        resolver: ConflictResolver,
        executor: Arc<RecordingExecutor>,
        nodes: Vec<NodeId>,
    }

    fn fixture(executor: RecordingExecutor, node_count: usize) -> Fixture {
        let events = EventBus::new(256);
        let topology = Arc::new(HierarchyTopology::new(
            Arc::new(InMemoryNodeRepository::new()),
            events.clone(),
            TopologyConfig::default(),
        ));
        let root = topology
            .add_node(
                NodeKind::Root,
                TaskDomain::Generic,
                None,
                100.0,
                BTreeSet::new(),
            )
            .unwrap();
        let nodes = (0..node_count)
            .map(|_| {
                topology
                    .add_node(
                        NodeKind::Worker,
                        TaskDomain::Development,
                        Some(root),
                        10.0,
                        BTreeSet::new(),
                    )
                    .unwrap()
            })
            .collect();

        let executor = Arc::new(executor);
        let resolver = ConflictResolver::new(
            topology,
            executor.clone(),
            events,
            ResolverConfig::default(),
        );
        Fixture {
            resolver,
            executor,
            nodes,
        }
    }

    #[test]
    fn test_severity_scoring_and_tiers() {
        let f = fixture(RecordingExecutor::default(), 4);

        // DependencyViolation base 5.0 + 2 participants (1.0) + cpu+memory
        // (2.0) = 8.0 → Critical.
        let critical = f.resolver.detect_conflict(
            ConflictType::DependencyViolation,
            f.nodes[..2].to_vec(),
            vec!["cpu".to_string(), "memory".to_string()],
            "ordering broken under contention",
        );
        assert_eq!(critical.severity, ConflictSeverity::Critical);
        assert!((critical.impact - 0.8).abs() < 1e-9);

        // TaskOverlap base 2.0 + 1.0 = 3.0 → Low.
        let low = f.resolver.detect_conflict(
            ConflictType::TaskOverlap,
            f.nodes[..2].to_vec(),
            vec![],
            "duplicate work detected",
        );
        assert_eq!(low.severity, ConflictSeverity::Low);
    }

    #[test]
    fn test_strategy_table() {
        let f = fixture(RecordingExecutor::default(), 2);
        let conflict = |ct, severity| Conflict {
            id: ConflictId::new(),
            conflict_type: ct,
            severity,
            participants: f.nodes.clone(),
            resources: vec![],
            description: String::new(),
            impact: 0.5,
            detected_at: Utc::now(),
        };

        assert_eq!(
            f.resolver.select_strategy(&conflict(
                ConflictType::ResourceContention,
                ConflictSeverity::High
            )),
            ResolutionStrategy::ResourceOptimization
        );
        assert_eq!(
            f.resolver.select_strategy(&conflict(
                ConflictType::ResourceContention,
                ConflictSeverity::Low
            )),
            ResolutionStrategy::RoundRobin
        );
        assert_eq!(
            f.resolver
                .select_strategy(&conflict(ConflictType::TaskOverlap, ConflictSeverity::High)),
            ResolutionStrategy::DomainSpecialization
        );
        assert_eq!(
            f.resolver.select_strategy(&conflict(
                ConflictType::DependencyViolation,
                ConflictSeverity::Medium
            )),
            ResolutionStrategy::TemporalSeparation
        );
        assert_eq!(
            f.resolver.select_strategy(&conflict(
                ConflictType::PerformanceDegradation,
                ConflictSeverity::Critical
            )),
            ResolutionStrategy::Escalation
        );
        assert_eq!(
            f.resolver.select_strategy(&conflict(
                ConflictType::PerformanceDegradation,
                ConflictSeverity::Medium
            )),
            ResolutionStrategy::PerformanceBased
        );
    }

    #[test]
    fn test_temporal_separation_staggers_all_but_first() {
        let f = fixture(RecordingExecutor::default(), 3);
        let conflict = f.resolver.detect_conflict(
            ConflictType::DependencyViolation,
            f.nodes.clone(),
            vec![],
            "violation",
        );
        let actions = f
            .resolver
            .generate_actions(&conflict, ResolutionStrategy::TemporalSeparation);

        assert_eq!(actions.len(), 2);
        assert!(actions.iter().all(|a| a.reversible));
        assert_eq!(actions[0].kind, ActionKind::Throttle { delay_ms: 1_000 });
        assert_eq!(actions[1].kind, ActionKind::Throttle { delay_ms: 2_000 });
    }

    #[test]
    fn test_prediction_discounts_per_action() {
        let f = fixture(RecordingExecutor::default(), 2);
        let conflict = f.resolver.detect_conflict(
            ConflictType::PriorityMismatch,
            f.nodes.clone(),
            vec![],
            "mismatch",
        );
        let few = f
            .resolver
            .predict_outcome(&conflict, ResolutionStrategy::PriorityBased, 1);
        let many = f
            .resolver
            .predict_outcome(&conflict, ResolutionStrategy::PriorityBased, 5);
        assert!(few.success_probability > many.success_probability);
        assert!((few.success_probability - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_resolution_implements_and_schedules_evaluation() {
        let f = fixture(RecordingExecutor::default(), 2);
        for node in &f.nodes {
            f.resolver.record_performance(*node, 0.4);
        }
        let conflict = f.resolver.detect_conflict(
            ConflictType::PriorityMismatch,
            f.nodes.clone(),
            vec![],
            "mismatch",
        );

        let resolution = f.resolver.resolve_conflict(conflict.id).await.unwrap();
        assert_eq!(resolution.state, ResolutionState::Implemented);
        assert_eq!(resolution.actions.len(), 2);
        assert_eq!(f.resolver.pending_evaluations(), 1);
        assert!(f.resolver.active_conflicts().is_empty());

        // Performance improved after implementation.
        for node in &f.nodes {
            for _ in 0..20 {
                f.resolver.record_performance(*node, 0.9);
            }
        }
        let later = Utc::now() + Duration::milliseconds(10_000);
        assert_eq!(f.resolver.evaluation_tick(later), 1);

        let history = f.resolver.history();
        let evaluated = &history[0];
        assert_eq!(evaluated.state, ResolutionState::Evaluated);
        assert!(evaluated.effectiveness.unwrap() > 0.5);
    }

    #[tokio::test]
    async fn test_evaluation_waits_for_delay() {
        let f = fixture(RecordingExecutor::default(), 2);
        let conflict = f.resolver.detect_conflict(
            ConflictType::PriorityMismatch,
            f.nodes.clone(),
            vec![],
            "mismatch",
        );
        f.resolver.resolve_conflict(conflict.id).await.unwrap();

        // Before the delay elapses nothing is evaluated.
        assert_eq!(f.resolver.evaluation_tick(Utc::now()), 0);
        assert_eq!(f.resolver.pending_evaluations(), 1);
    }

    #[tokio::test]
    async fn test_partial_failure_rolls_back_and_escalates() {
        // PriorityBased over two participants generates two reversible
        // actions; the second application fails.
        let f = fixture(RecordingExecutor::failing_after(1), 2);
        let conflict = f.resolver.detect_conflict(
            ConflictType::PriorityMismatch,
            f.nodes.clone(),
            vec![],
            "mismatch",
        );
        let mut events = f.resolver.events.subscribe();

        let resolution = f.resolver.resolve_conflict(conflict.id).await.unwrap();
        assert_eq!(resolution.state, ResolutionState::Escalated);
        assert_eq!(f.executor.applied.lock().len(), 1);
        assert_eq!(f.executor.rolled_back.lock().len(), 1);
        assert_eq!(f.resolver.pending_evaluations(), 0);

        let mut escalated = false;
        while let Ok(event) = events.try_recv() {
            if let crate::infrastructure::SwarmEvent::Conflict(
                ConflictEvent::ConflictEscalated { conflict_id, .. },
            ) = event
            {
                assert_eq!(conflict_id, conflict.id);
                escalated = true;
            }
        }
        assert!(escalated);
    }

    #[tokio::test]
    async fn test_critical_degradation_escalates_directly() {
        let f = fixture(RecordingExecutor::default(), 6);
        // 6 participants (3.0) + base 4.5 + cpu (1.0) = 8.5 → Critical.
        let conflict = f.resolver.detect_conflict(
            ConflictType::PerformanceDegradation,
            f.nodes.clone(),
            vec!["cpu".to_string()],
            "throughput collapsing",
        );
        assert_eq!(conflict.severity, ConflictSeverity::Critical);

        let resolution = f.resolver.resolve_conflict(conflict.id).await.unwrap();
        assert_eq!(resolution.strategy, ResolutionStrategy::Escalation);
        assert_eq!(resolution.state, ResolutionState::Escalated);
        assert_eq!(f.resolver.pending_evaluations(), 0);
    }

    #[test]
    fn test_performance_window_is_bounded() {
        let f = fixture(RecordingExecutor::default(), 1);
        for i in 0..50 {
            f.resolver.record_performance(f.nodes[0], i as f64 / 50.0);
        }
        let state = f.resolver.state.lock();
        assert_eq!(state.performance[&f.nodes[0]].len(), 20);
    }

    #[test]
    fn test_degradation_forecast_on_declining_trend() {
        let f = fixture(RecordingExecutor::default(), 2);
        // Steady decline on node 0, flat on node 1.
        for i in 0..10 {
            f.resolver
                .record_performance(f.nodes[0], 0.9 - 0.08 * i as f64);
            f.resolver.record_performance(f.nodes[1], 0.9);
        }

        let forecasts = f.resolver.predict_degradation();
        assert_eq!(forecasts.len(), 1);
        let forecast = &forecasts[0];
        assert_eq!(forecast.node, f.nodes[0]);
        assert!(forecast.slope < -0.02);
        assert!(forecast.severity > 0.7);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let events = EventBus::new(256);
        let topology = Arc::new(HierarchyTopology::new(
            Arc::new(InMemoryNodeRepository::new()),
            events.clone(),
            TopologyConfig::default(),
        ));
        let root = topology
            .add_node(
                NodeKind::Root,
                TaskDomain::Generic,
                None,
                100.0,
                BTreeSet::new(),
            )
            .unwrap();
        let node = topology
            .add_node(
                NodeKind::Worker,
                TaskDomain::Generic,
                Some(root),
                10.0,
                BTreeSet::new(),
            )
            .unwrap();
        let config = ResolverConfig {
            history_limit: 3,
            ..ResolverConfig::default()
        };
        let resolver = ConflictResolver::new(
            topology,
            Arc::new(RecordingExecutor::default()),
            events,
            config,
        );

        for _ in 0..5 {
            let conflict = resolver.detect_conflict(
                ConflictType::PriorityMismatch,
                vec![node],
                vec![],
                "mismatch",
            );
            resolver.resolve_conflict(conflict.id).await.unwrap();
        }
        assert_eq!(resolver.history().len(), 3);
        assert_eq!(resolver.statistics().total_resolutions, 3);
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Subtask Dependency Graph
//!
//! Directed graph over one decomposition's subtasks: cycle detection (DFS
//! with an explicit recursion stack), critical-path length, readiness, and
//! parallelizability.

use std::collections::{HashMap, HashSet};

use aegis_swarm_core::domain::task::{DependencyEdge, DistributionError, SubTask, TaskId};

pub struct DependencyGraph {
    nodes: Vec<TaskId>,
    durations: HashMap<TaskId, u64>,
    /// Adjacency: prerequisite → dependents.
    successors: HashMap<TaskId, Vec<TaskId>>,
    /// Reverse adjacency: dependent → prerequisites.
    predecessors: HashMap<TaskId, Vec<TaskId>>,
}

impl DependencyGraph {
    /// Build the graph from a decomposition. Edges referencing tasks outside
    /// the subtask set are ignored (they belong to other plans).
    pub fn build(subtasks: &[SubTask], edges: &[DependencyEdge]) -> Self {
        let nodes: Vec<TaskId> = subtasks.iter().map(|s| s.id).collect();
        let node_set: HashSet<TaskId> = nodes.iter().copied().collect();
        let durations = subtasks
            .iter()
            .map(|s| (s.id, s.estimated_duration_ms))
            .collect();

        let mut successors: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        let mut predecessors: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        for edge in edges {
            if node_set.contains(&edge.from) && node_set.contains(&edge.to) {
                successors.entry(edge.from).or_default().push(edge.to);
                predecessors.entry(edge.to).or_default().push(edge.from);
            }
        }

        Self {
            nodes,
            durations,
            successors,
            predecessors,
        }
    }

    /// Depth-first cycle check with an explicit recursion stack.
    ///
    /// # Errors
    ///
    /// `CycleDetected` naming the first task found on a back edge. Fatal:
    /// the plan is rejected outright, never retried.
    pub fn validate_no_cycles(&self) -> Result<(), DistributionError> {
        let mut visited: HashSet<TaskId> = HashSet::new();
        let mut in_stack: HashSet<TaskId> = HashSet::new();

        for &start in &self.nodes {
            if visited.contains(&start) {
                continue;
            }
            self.dfs_cycle(start, &mut visited, &mut in_stack)?;
        }
        Ok(())
    }

    fn dfs_cycle(
        &self,
        node: TaskId,
        visited: &mut HashSet<TaskId>,
        in_stack: &mut HashSet<TaskId>,
    ) -> Result<(), DistributionError> {
        visited.insert(node);
        in_stack.insert(node);

        if let Some(succs) = self.successors.get(&node) {
            for &next in succs {
                if in_stack.contains(&next) {
                    return Err(DistributionError::CycleDetected(next));
                }
                if !visited.contains(&next) {
                    self.dfs_cycle(next, visited, in_stack)?;
                }
            }
        }

        in_stack.remove(&node);
        Ok(())
    }

    /// Longest duration-weighted path through the DAG, in milliseconds.
    /// Lower-bounds the plan's completion time. Requires an acyclic graph.
    pub fn critical_path_ms(&self) -> u64 {
        let mut memo: HashMap<TaskId, u64> = HashMap::new();
        self.nodes
            .iter()
            .map(|&n| self.longest_from(n, &mut memo))
            .max()
            .unwrap_or(0)
    }

    fn longest_from(&self, node: TaskId, memo: &mut HashMap<TaskId, u64>) -> u64 {
        if let Some(&cached) = memo.get(&node) {
            return cached;
        }
        let own = self.durations.get(&node).copied().unwrap_or(0);
        let tail = self
            .successors
            .get(&node)
            .map(|succs| {
                succs
                    .iter()
                    .map(|&s| self.longest_from(s, memo))
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        let total = own + tail;
        memo.insert(node, total);
        total
    }

    /// Tasks whose every prerequisite is in `completed`.
    pub fn ready_tasks(&self, completed: &HashSet<TaskId>) -> Vec<TaskId> {
        self.nodes
            .iter()
            .filter(|n| !completed.contains(n))
            .filter(|n| {
                self.predecessors
                    .get(n)
                    .map(|preds| preds.iter().all(|p| completed.contains(p)))
                    .unwrap_or(true)
            })
            .copied()
            .collect()
    }

    /// Whether at least two subtasks can run concurrently, i.e. some
    /// topological depth level holds more than one task.
    pub fn is_parallelizable(&self) -> bool {
        if self.nodes.len() < 2 {
            return false;
        }
        let mut depth: HashMap<TaskId, usize> = HashMap::new();
        for &n in &self.nodes {
            self.depth_of(n, &mut depth);
        }
        let mut level_counts: HashMap<usize, usize> = HashMap::new();
        for d in depth.values() {
            *level_counts.entry(*d).or_insert(0) += 1;
        }
        level_counts.values().any(|c| *c > 1)
    }

    fn depth_of(&self, node: TaskId, memo: &mut HashMap<TaskId, usize>) -> usize {
        if let Some(&d) = memo.get(&node) {
            return d;
        }
        let d = self
            .predecessors
            .get(&node)
            .map(|preds| {
                preds
                    .iter()
                    .map(|&p| self.depth_of(p, memo) + 1)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        memo.insert(node, d);
        d
    }
}

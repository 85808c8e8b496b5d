// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # MECE Validation
//!
//! Checks a decomposition for mutual exclusivity (pairwise semantic overlap
//! between subtask descriptions) and collective exhaustiveness (coverage of
//! the per-domain required-capability table). The resulting score is
//! advisory: low scores are logged with recommendations and feed back into
//! decomposition-strategy tuning, but never block execution on their own.

use std::collections::BTreeSet;

use aegis_swarm_core::domain::task::{SubTask, TaskDomain, TaskId, TaskSpec};
use serde::{Deserialize, Serialize};
use tracing::debug;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "into", "from", "that", "this", "all", "are",
];

/// Same-domain bonus applied when two subtasks share a domain signal word.
const DOMAIN_KEYWORD_BONUS: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverlapRisk {
    Low,
    Medium,
    High,
}

/// Two subtasks whose descriptions look like duplicated work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlapFinding {
    pub first: TaskId,
    pub second: TaskId,
    pub similarity: f64,
    pub risk: OverlapRisk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GapSeverity {
    Medium,
    High,
}

/// A hole in the decomposition's coverage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GapFinding {
    /// No subtask was assigned to the task's own domain.
    DomainUnserved { domain: TaskDomain },
    /// A required capability is covered by no subtask.
    CapabilityMissing {
        capability: String,
        severity: GapSeverity,
    },
}

impl GapFinding {
    fn severity(&self) -> GapSeverity {
        match self {
            GapFinding::DomainUnserved { .. } => GapSeverity::High,
            GapFinding::CapabilityMissing { severity, .. } => *severity,
        }
    }
}

/// Full MECE report for one decomposition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeceReport {
    /// Overall score in `[0, 1]`.
    pub score: f64,
    pub overlaps: Vec<OverlapFinding>,
    pub gaps: Vec<GapFinding>,
    pub recommendations: Vec<String>,
    /// Whether the score cleared the configured validity floor.
    pub valid: bool,
}

/// Validate a decomposition against the MECE criteria.
pub fn validate(
    task: &TaskSpec,
    subtasks: &[SubTask],
    overlap_threshold: f64,
    validity_floor: f64,
) -> MeceReport {
    let overlaps = detect_semantic_overlaps(subtasks, overlap_threshold);
    let gaps = detect_coverage_gaps(task, subtasks);

    let penalty: f64 = overlaps
        .iter()
        .map(|o| match o.risk {
            OverlapRisk::High => 0.6,
            OverlapRisk::Medium => 0.4,
            OverlapRisk::Low => 0.2,
        })
        .sum::<f64>()
        + gaps
            .iter()
            .map(|g| match g.severity() {
                GapSeverity::High => 0.5,
                GapSeverity::Medium => 0.3,
            })
            .sum::<f64>();

    let n = subtasks.len().max(1) as f64;
    let score = (1.0 - penalty / n).clamp(0.0, 1.0);

    let mut recommendations = Vec::new();
    for overlap in &overlaps {
        recommendations.push(format!(
            "merge or differentiate subtasks {} and {} (similarity {:.2})",
            overlap.first, overlap.second, overlap.similarity
        ));
    }
    for gap in &gaps {
        match gap {
            GapFinding::DomainUnserved { domain } => {
                recommendations.push(format!("add a subtask serving domain '{domain}'"));
            }
            GapFinding::CapabilityMissing { capability, .. } => {
                recommendations.push(format!("add coverage for capability '{capability}'"));
            }
        }
    }

    debug!(
        task = %task.id,
        score,
        overlaps = overlaps.len(),
        gaps = gaps.len(),
        "mece validation finished"
    );

    MeceReport {
        score,
        overlaps,
        gaps,
        recommendations,
        valid: score >= validity_floor,
    }
}

/// Pairwise semantic-similarity scan. Similarity is the keyword Jaccard score
/// plus a bonus when both subtasks share a same-domain signal word.
pub fn detect_semantic_overlaps(
    subtasks: &[SubTask],
    overlap_threshold: f64,
) -> Vec<OverlapFinding> {
    let keyword_sets: Vec<BTreeSet<String>> = subtasks
        .iter()
        .map(|s| keywords(&s.description))
        .collect();

    let mut findings = Vec::new();
    for i in 0..subtasks.len() {
        for j in (i + 1)..subtasks.len() {
            let a = &subtasks[i];
            let b = &subtasks[j];
            let same_domain = a.domain == b.domain;

            let mut similarity = jaccard(&keyword_sets[i], &keyword_sets[j]);
            // Degenerate descriptions with no usable keywords: fall back to
            // literal comparison.
            if keyword_sets[i].is_empty()
                && keyword_sets[j].is_empty()
                && a.description.trim() == b.description.trim()
            {
                similarity = 1.0;
            }
            if same_domain {
                let shared_signal = keyword_sets[i]
                    .intersection(&keyword_sets[j])
                    .any(|k| a.domain.keywords().iter().any(|dk| k.contains(dk)));
                if shared_signal {
                    similarity = (similarity + DOMAIN_KEYWORD_BONUS).min(1.0);
                }
            }

            if similarity > overlap_threshold {
                let risk = if similarity > 0.9 || (similarity > 0.8 && same_domain) {
                    OverlapRisk::High
                } else if similarity > 0.8 || same_domain {
                    OverlapRisk::Medium
                } else {
                    OverlapRisk::Low
                };
                findings.push(OverlapFinding {
                    first: a.id,
                    second: b.id,
                    similarity,
                    risk,
                });
            }
        }
    }
    findings
}

/// Compare the union of subtask capabilities against the fixed per-domain
/// required-capability table.
pub fn detect_coverage_gaps(task: &TaskSpec, subtasks: &[SubTask]) -> Vec<GapFinding> {
    let mut gaps = Vec::new();

    if !subtasks.iter().any(|s| s.domain == task.domain) {
        gaps.push(GapFinding::DomainUnserved {
            domain: task.domain,
        });
    }

    let covered: BTreeSet<&String> = subtasks
        .iter()
        .flat_map(|s| s.required_capabilities.iter())
        .collect();

    for required in task.domain.required_capabilities() {
        let is_covered = covered
            .iter()
            .any(|c| c.contains(required) || required.contains(c.as_str()));
        if !is_covered {
            let severity = if task.required_capabilities.contains(*required) {
                GapSeverity::High
            } else {
                GapSeverity::Medium
            };
            gaps.push(GapFinding::CapabilityMissing {
                capability: required.to_string(),
                severity,
            });
        }
    }
    gaps
}

fn keywords(description: &str) -> BTreeSet<String> {
    description
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2 && !STOPWORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_swarm_core::domain::task::{PriorityTier, ResourceFootprint};

    fn subtask(domain: TaskDomain, description: &str, caps: &[&str]) -> SubTask {
        SubTask {
            id: TaskId::new(),
            parent: TaskId::new(),
            domain,
            priority: PriorityTier::Normal,
            description: description.to_string(),
            estimated_duration_ms: 1_000,
            required_capabilities: caps.iter().map(|s| s.to_string()).collect(),
            prerequisites: vec![],
            footprint: ResourceFootprint::default(),
        }
    }

    #[test]
    fn test_identical_descriptions_same_domain_high_risk() {
        let a = subtask(TaskDomain::Quality, "verify integration test coverage", &["testing"]);
        let b = subtask(TaskDomain::Quality, "verify integration test coverage", &["testing"]);
        let findings = detect_semantic_overlaps(&[a, b], 0.7);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].risk, OverlapRisk::High);
        assert!(findings[0].similarity > 0.9);
    }

    #[test]
    fn test_distinct_descriptions_no_overlap() {
        let a = subtask(TaskDomain::Development, "draft module structure outline", &["planning"]);
        let b = subtask(TaskDomain::Quality, "measure regression suite runtime", &["testing"]);
        assert!(detect_semantic_overlaps(&[a, b], 0.7).is_empty());
    }

    #[test]
    fn test_coverage_gap_for_missing_capability() {
        let task = TaskSpec::new(TaskDomain::Development, "build feature");
        let subs = vec![
            subtask(TaskDomain::Development, "plan the work", &["planning"]),
            subtask(TaskDomain::Development, "implement the work", &["coding"]),
        ];
        let gaps = detect_coverage_gaps(&task, &subs);
        // "testing" from the Development table is uncovered.
        assert!(gaps.iter().any(|g| matches!(
            g,
            GapFinding::CapabilityMissing { capability, .. } if capability == "testing"
        )));
    }

    #[test]
    fn test_domain_unserved_gap() {
        let task = TaskSpec::new(TaskDomain::Quality, "audit suite");
        let subs = vec![subtask(
            TaskDomain::Development,
            "rewrite helpers",
            &["testing", "review"],
        )];
        let gaps = detect_coverage_gaps(&task, &subs);
        assert!(gaps
            .iter()
            .any(|g| matches!(g, GapFinding::DomainUnserved { domain } if *domain == TaskDomain::Quality)));
    }

    #[test]
    fn test_score_always_in_unit_interval() {
        let task = TaskSpec::new(TaskDomain::Development, "build feature");
        // Worst case: one subtask, overlapping nothing but missing everything.
        let subs = vec![subtask(TaskDomain::Research, "poke around", &[])];
        let report = validate(&task, &subs, 0.7, 0.75);
        assert!((0.0..=1.0).contains(&report.score));
        assert!(!report.valid);
        assert!(!report.recommendations.is_empty());

        let good = vec![
            subtask(TaskDomain::Development, "plan the module boundaries", &["planning"]),
            subtask(TaskDomain::Development, "write the parser", &["coding"]),
            subtask(TaskDomain::Development, "add regression coverage", &["testing"]),
        ];
        let report = validate(&task, &good, 0.7, 0.75);
        assert!((0.0..=1.0).contains(&report.score));
        assert!(report.valid);
    }
}

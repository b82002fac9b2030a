//! Immutable audit results.
//!
//! `AuditResults` is built once at the end of the pipeline and only read
//! afterwards. Every reporting surface (CLI formats, downstream renderers)
//! goes through the accessors here.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cohort::DescriptiveStats;
use crate::config::AuditConfig;
use crate::fairness::{AttributeFairness, GapSummary};
use crate::governance::{Flag, GovernanceRecommendation, GovernanceStatus};
use crate::performance::PerformanceSnapshot;
use crate::reproducibility::ReproducibilityBundle;

/// A group left out of gap computation for being below `min_subgroup_n`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedGroup {
    pub name: String,
    pub n: usize,
}

/// Disaggregated performance for one sensitive attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubgroupPerformance {
    pub attribute: String,
    pub reference: String,
    /// Decision threshold the classification metrics were computed at.
    pub threshold: f64,
    /// Eligible groups only, reference included.
    pub groups: BTreeMap<String, PerformanceSnapshot>,
    pub excluded_groups: Vec<ExcludedGroup>,
}

impl SubgroupPerformance {
    pub fn reference_excluded(&self) -> bool {
        self.excluded_groups.iter().any(|g| g.name == self.reference)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditResults {
    config: AuditConfig,
    threshold: f64,
    audit_id: String,
    run_timestamp: String,
    random_seed: u64,
    descriptive_stats: DescriptiveStats,
    overall_performance: PerformanceSnapshot,
    subgroup_performance: BTreeMap<String, SubgroupPerformance>,
    fairness_metrics: BTreeMap<String, AttributeFairness>,
    flags: Vec<Flag>,
    governance_recommendation: GovernanceRecommendation,
    reproducibility: ReproducibilityBundle,
    warnings: Vec<String>,
}

/// Parts the pipeline assembles; consumed by `AuditResults::new`.
#[derive(Debug, Clone)]
pub struct AuditResultsParts {
    pub config: AuditConfig,
    pub threshold: f64,
    pub random_seed: u64,
    pub descriptive_stats: DescriptiveStats,
    pub overall_performance: PerformanceSnapshot,
    pub subgroup_performance: BTreeMap<String, SubgroupPerformance>,
    pub fairness_metrics: BTreeMap<String, AttributeFairness>,
    pub flags: Vec<Flag>,
    pub governance_recommendation: GovernanceRecommendation,
    pub reproducibility: ReproducibilityBundle,
    pub warnings: Vec<String>,
}

impl AuditResults {
    /// Stamp the parts with a fresh audit id and UTC timestamp.
    pub fn new(parts: AuditResultsParts) -> Self {
        Self {
            audit_id: uuid::Uuid::new_v4().to_string(),
            run_timestamp: chrono::Utc::now().to_rfc3339(),
            config: parts.config,
            threshold: parts.threshold,
            random_seed: parts.random_seed,
            descriptive_stats: parts.descriptive_stats,
            overall_performance: parts.overall_performance,
            subgroup_performance: parts.subgroup_performance,
            fairness_metrics: parts.fairness_metrics,
            flags: parts.flags,
            governance_recommendation: parts.governance_recommendation,
            reproducibility: parts.reproducibility,
            warnings: parts.warnings,
        }
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn audit_id(&self) -> &str {
        &self.audit_id
    }

    pub fn run_timestamp(&self) -> &str {
        &self.run_timestamp
    }

    pub fn random_seed(&self) -> u64 {
        self.random_seed
    }

    pub fn descriptive_stats(&self) -> &DescriptiveStats {
        &self.descriptive_stats
    }

    pub fn overall_performance(&self) -> &PerformanceSnapshot {
        &self.overall_performance
    }

    pub fn subgroup_performance(&self) -> &BTreeMap<String, SubgroupPerformance> {
        &self.subgroup_performance
    }

    pub fn fairness_metrics(&self) -> &BTreeMap<String, AttributeFairness> {
        &self.fairness_metrics
    }

    /// Worst-case gap of `metric` (e.g. `"equalized_odds_diff"`) for an attribute.
    pub fn fairness_summary(&self, attribute: &str, metric: &str) -> Option<&GapSummary> {
        self.fairness_metrics.get(attribute)?.summary.get(metric)
    }

    pub fn flags(&self) -> &[Flag] {
        &self.flags
    }

    pub fn governance_recommendation(&self) -> &GovernanceRecommendation {
        &self.governance_recommendation
    }

    pub fn status(&self) -> GovernanceStatus {
        self.governance_recommendation.status
    }

    pub fn reproducibility(&self) -> &ReproducibilityBundle {
        &self.reproducibility
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

//! Rule-based governance recommendation.
//!
//! Every check reduces to a utilization `u` of its limit (0 = ideal,
//! 1 = exactly at the limit). `u > 1` fires an error flag, `u >= 1 - margin`
//! a warning flag, anything lower counts as within threshold. Undersized
//! subgroups always produce a warning flag.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::GovernanceThresholds;
use crate::fairness::{ratio_disparity, AttributeFairness, FairnessGapRecord, GapKind};
use crate::performance::PerformanceSnapshot;
use crate::results::SubgroupPerformance;
use crate::types::MaybeMetric;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagCategory {
    FairnessGap,
    Performance,
    SampleSize,
    Missingness,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagDetails {
    pub attribute: Option<String>,
    pub group: Option<String>,
    pub metric: String,
    pub value: MaybeMetric,
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    pub severity: Severity,
    pub category: FlagCategory,
    pub message: String,
    pub details: FlagDetails,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GovernanceStatus {
    #[serde(rename = "REVIEW NEEDED")]
    ReviewNeeded,
    #[serde(rename = "CONDITIONAL")]
    Conditional,
    #[serde(rename = "READY")]
    Ready,
}

impl GovernanceStatus {
    /// Any error wins, then any warning, else ready.
    pub fn from_flags(flags: &[Flag]) -> Self {
        if flags.iter().any(|f| f.severity == Severity::Error) {
            GovernanceStatus::ReviewNeeded
        } else if flags.iter().any(|f| f.severity == Severity::Warning) {
            GovernanceStatus::Conditional
        } else {
            GovernanceStatus::Ready
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GovernanceStatus::ReviewNeeded => "REVIEW NEEDED",
            GovernanceStatus::Conditional => "CONDITIONAL",
            GovernanceStatus::Ready => "READY",
        }
    }
}

impl fmt::Display for GovernanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceRecommendation {
    pub status: GovernanceStatus,
    pub advisory: String,
    #[serde(alias = "n_errors")]
    pub outside_threshold_count: usize,
    #[serde(alias = "n_warnings")]
    pub near_threshold_count: usize,
    #[serde(alias = "n_pass")]
    pub within_threshold_count: usize,
}

impl GovernanceRecommendation {
    pub fn n_errors(&self) -> usize {
        self.outside_threshold_count
    }

    pub fn n_warnings(&self) -> usize {
        self.near_threshold_count
    }

    pub fn n_pass(&self) -> usize {
        self.within_threshold_count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Within,
    Near,
    Outside,
}

/// Everything the rule engine looks at.
#[derive(Debug, Clone, Copy)]
pub struct GovernanceContext<'a> {
    pub thresholds: &'a GovernanceThresholds,
    pub overall: &'a PerformanceSnapshot,
    pub missing_label_rate: f64,
    /// Attribute name and its missing-value rate over the full cohort.
    pub attribute_missing: &'a [(String, f64)],
    pub subgroups: &'a BTreeMap<String, SubgroupPerformance>,
    pub fairness: &'a BTreeMap<String, AttributeFairness>,
    /// Configured attributes with no value on any labeled record.
    pub unaudited_attributes: &'a [String],
}

#[derive(Debug, Clone, PartialEq)]
pub struct GovernanceReport {
    pub flags: Vec<Flag>,
    pub recommendation: GovernanceRecommendation,
    /// Checks skipped because the value was unavailable.
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Utilization
// ---------------------------------------------------------------------------

/// `|v| / limit` for signed difference gaps.
pub fn difference_utilization(value: f64, limit: f64) -> f64 {
    value.abs() / limit
}

/// Disparity `1 - min(r, 1/r)` against `1 - limit`. A ratio of zero or below
/// is total disparity.
pub fn ratio_utilization(ratio: f64, limit: f64) -> f64 {
    ratio_disparity(ratio) / (1.0 - limit)
}

/// AUROC shortfall from a perfect 1.0, relative to the allowed shortfall.
pub fn auroc_utilization(auroc: f64, min_auroc: f64) -> f64 {
    (1.0 - auroc) / (1.0 - min_auroc)
}

pub fn missing_rate_utilization(rate: f64, max_rate: f64) -> f64 {
    rate / max_rate
}

pub fn classify(utilization: f64, margin: f64) -> CheckOutcome {
    if utilization > 1.0 {
        CheckOutcome::Outside
    } else if utilization >= 1.0 - margin {
        CheckOutcome::Near
    } else {
        CheckOutcome::Within
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct Tally {
    margin: f64,
    flags: Vec<Flag>,
    within: usize,
    warnings: Vec<String>,
}

struct Check<'a> {
    category: FlagCategory,
    attribute: Option<&'a str>,
    group: Option<&'a str>,
    metric: &'a str,
    value: f64,
    limit: f64,
    utilization: f64,
    /// Human description of the scope, e.g. "race=Black vs White".
    scope: String,
}

impl Tally {
    fn record(&mut self, check: Check<'_>) {
        let outcome = classify(check.utilization, self.margin);
        let severity = match outcome {
            CheckOutcome::Within => {
                self.within += 1;
                return;
            }
            CheckOutcome::Near => Severity::Warning,
            CheckOutcome::Outside => Severity::Error,
        };
        let relation = match (outcome, check.category) {
            (CheckOutcome::Outside, FlagCategory::Performance) => "is below minimum",
            (CheckOutcome::Outside, _) => "exceeds limit",
            (_, FlagCategory::Performance) => "is near minimum",
            _ => "is near limit",
        };
        let message = format!(
            "{}: {} = {:.3} {} {:.3}",
            check.scope, check.metric, check.value, relation, check.limit
        );
        tracing::debug!(?severity, %message, "governance flag");
        self.flags.push(Flag {
            severity,
            category: check.category,
            message,
            details: FlagDetails {
                attribute: check.attribute.map(str::to_string),
                group: check.group.map(str::to_string),
                metric: check.metric.to_string(),
                value: Some(check.value),
                threshold: Some(check.limit),
            },
        });
    }

    fn insufficient_sample(
        &mut self,
        attribute: &str,
        group: &str,
        n: usize,
        min: usize,
        is_reference: bool,
    ) {
        let message = if is_reference {
            format!(
                "{attribute}={group}: reference group n={n} < {min}; \
                 fairness gaps for {attribute} not computed"
            )
        } else {
            format!("{attribute}={group}: n={n} < {min}; excluded from fairness gaps")
        };
        self.flags.push(Flag {
            severity: Severity::Warning,
            category: FlagCategory::SampleSize,
            message,
            details: FlagDetails {
                attribute: Some(attribute.to_string()),
                group: Some(group.to_string()),
                metric: "n".to_string(),
                value: Some(n as f64),
                threshold: Some(min as f64),
            },
        });
    }

    fn no_labeled_values(&mut self, attribute: &str, min: usize) {
        self.flags.push(Flag {
            severity: Severity::Warning,
            category: FlagCategory::SampleSize,
            message: format!(
                "{attribute}: no labeled records with a value; attribute not audited"
            ),
            details: FlagDetails {
                attribute: Some(attribute.to_string()),
                group: None,
                metric: "n".to_string(),
                value: Some(0.0),
                threshold: Some(min as f64),
            },
        });
    }

    fn gap(&mut self, gap: &FairnessGapRecord, thresholds: &GovernanceThresholds) {
        let Some(limit) = thresholds.limit_for(&gap.metric) else {
            return;
        };
        let scope = format!("{}={} vs {}", gap.attribute, gap.group, gap.reference);
        let Some(value) = gap.value else {
            self.warnings
                .push(format!("{scope}: {} unavailable, not checked", gap.metric));
            return;
        };
        let utilization = match gap.kind {
            GapKind::Difference => difference_utilization(value, limit),
            GapKind::Ratio => ratio_utilization(value, limit),
        };
        self.record(Check {
            category: FlagCategory::FairnessGap,
            attribute: Some(gap.attribute.as_str()),
            group: Some(gap.group.as_str()),
            metric: &gap.metric,
            value,
            limit,
            utilization,
            scope,
        });
    }

    fn auroc(
        &mut self,
        auroc: MaybeMetric,
        min_auroc: f64,
        attribute: Option<&str>,
        group: Option<&str>,
    ) {
        let scope = match (attribute, group) {
            (Some(a), Some(g)) => format!("{a}={g}"),
            _ => "overall".to_string(),
        };
        let Some(value) = auroc else {
            self.warnings.push(format!("{scope}: auroc unavailable, not checked"));
            return;
        };
        self.record(Check {
            category: FlagCategory::Performance,
            attribute,
            group,
            metric: "auroc",
            value,
            limit: min_auroc,
            utilization: auroc_utilization(value, min_auroc),
            scope,
        });
    }
}

/// Run every governance check and derive the recommendation.
pub fn evaluate_governance(ctx: &GovernanceContext<'_>) -> GovernanceReport {
    let t = ctx.thresholds;
    let mut tally = Tally {
        margin: t.near_threshold_margin(),
        flags: Vec::new(),
        within: 0,
        warnings: Vec::new(),
    };

    // -- Missingness --
    let max_missing = t.max_missing_rate();
    tally.record(Check {
        category: FlagCategory::Missingness,
        attribute: None,
        group: None,
        metric: "missing_label_rate",
        value: ctx.missing_label_rate,
        limit: max_missing,
        utilization: missing_rate_utilization(ctx.missing_label_rate, max_missing),
        scope: "overall".to_string(),
    });
    for (attribute, rate) in ctx.attribute_missing {
        tally.record(Check {
            category: FlagCategory::Missingness,
            attribute: Some(attribute.as_str()),
            group: None,
            metric: "missing_rate",
            value: *rate,
            limit: max_missing,
            utilization: missing_rate_utilization(*rate, max_missing),
            scope: attribute.clone(),
        });
    }

    // -- Overall discrimination --
    let min_auroc = t.min_auroc();
    tally.auroc(ctx.overall.discrimination.auroc, min_auroc, None, None);

    // -- Per attribute --
    for attribute in ctx.unaudited_attributes {
        tally.no_labeled_values(attribute, t.min_subgroup_n());
    }
    for (attribute, subgroup) in ctx.subgroups {
        for excluded in &subgroup.excluded_groups {
            tally.insufficient_sample(
                attribute,
                &excluded.name,
                excluded.n,
                t.min_subgroup_n(),
                excluded.name == subgroup.reference,
            );
        }
        for (group, snapshot) in &subgroup.groups {
            tally.auroc(
                snapshot.discrimination.auroc,
                min_auroc,
                Some(attribute.as_str()),
                Some(group.as_str()),
            );
        }
        if let Some(fairness) = ctx.fairness.get(attribute) {
            for gap in &fairness.gaps {
                tally.gap(gap, t);
            }
        }
    }

    let status = GovernanceStatus::from_flags(&tally.flags);
    let outside = tally
        .flags
        .iter()
        .filter(|f| f.severity == Severity::Error)
        .count();
    let near = tally.flags.len() - outside;
    let advisory = advisory(status, &tally.flags, tally.within);

    tracing::info!(%status, outside, near, within = tally.within, "governance evaluated");

    GovernanceReport {
        recommendation: GovernanceRecommendation {
            status,
            advisory,
            outside_threshold_count: outside,
            near_threshold_count: near,
            within_threshold_count: tally.within,
        },
        flags: tally.flags,
        warnings: tally.warnings,
    }
}

fn advisory(status: GovernanceStatus, flags: &[Flag], within: usize) -> String {
    let count = |category: FlagCategory, severity: Severity| {
        flags
            .iter()
            .filter(|f| f.category == category && f.severity == severity)
            .count()
    };
    match status {
        GovernanceStatus::ReviewNeeded => {
            let mut parts = Vec::new();
            for (category, label) in [
                (FlagCategory::FairnessGap, "fairness gap"),
                (FlagCategory::Performance, "performance"),
                (FlagCategory::Missingness, "missing data"),
            ] {
                let n = count(category, Severity::Error);
                if n > 0 {
                    parts.push(format!("{n} {label}"));
                }
            }
            format!(
                "Outside governance thresholds: {}. \
                 Review by the governance committee is required before deployment.",
                parts.join(", ")
            )
        }
        GovernanceStatus::Conditional => {
            let sample = count(FlagCategory::SampleSize, Severity::Warning);
            let near = flags.len() - sample;
            let mut parts = Vec::new();
            if near > 0 {
                parts.push(format!("{near} check(s) near threshold"));
            }
            if sample > 0 {
                parts.push(format!("{sample} subgroup(s) below minimum sample size"));
            }
            format!(
                "No thresholds exceeded, but {}. \
                 Deployment may proceed with documented monitoring.",
                parts.join(" and ")
            )
        }
        GovernanceStatus::Ready => format!(
            "All {within} governance checks within thresholds. \
             Suitable for deployment with routine monitoring."
        ),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::performance::{compute_performance, MetricOptions};
    use crate::results::ExcludedGroup;

    fn flag(severity: Severity) -> Flag {
        Flag {
            severity,
            category: FlagCategory::FairnessGap,
            message: String::new(),
            details: FlagDetails {
                attribute: None,
                group: None,
                metric: "x".into(),
                value: None,
                threshold: None,
            },
        }
    }

    fn gap(value: Option<f64>, kind: GapKind, metric: &str) -> FairnessGapRecord {
        FairnessGapRecord {
            attribute: "race".into(),
            group: "B".into(),
            reference: "A".into(),
            metric: metric.into(),
            kind,
            value,
            group_value: None,
            reference_value: None,
            n_group: 200,
            n_reference: 400,
            ci_lower: None,
            ci_upper: None,
        }
    }

    fn good_snapshot() -> PerformanceSnapshot {
        let probs: Vec<f64> = (0..40).map(|i| i as f64 / 40.0).collect();
        let labels: Vec<f64> = (0..40).map(|i| if i >= 20 { 1.0 } else { 0.0 }).collect();
        compute_performance(&probs, &labels, &MetricOptions::default())
    }

    fn run(gaps: Vec<FairnessGapRecord>, excluded: Vec<ExcludedGroup>) -> GovernanceReport {
        run_with_unaudited(gaps, excluded, &[])
    }

    fn run_with_unaudited(
        gaps: Vec<FairnessGapRecord>,
        excluded: Vec<ExcludedGroup>,
        unaudited: &[String],
    ) -> GovernanceReport {
        let thresholds = GovernanceThresholds::default();
        let overall = good_snapshot();
        let mut subgroups = BTreeMap::new();
        subgroups.insert(
            "race".to_string(),
            SubgroupPerformance {
                attribute: "race".into(),
                reference: "A".into(),
                threshold: 0.5,
                groups: BTreeMap::new(),
                excluded_groups: excluded,
            },
        );
        let mut fairness = BTreeMap::new();
        fairness.insert("race".to_string(), AttributeFairness::new("race", "A", gaps));
        let ctx = GovernanceContext {
            thresholds: &thresholds,
            overall: &overall,
            missing_label_rate: 0.0,
            attribute_missing: &[("race".to_string(), 0.0)],
            subgroups: &subgroups,
            fairness: &fairness,
            unaudited_attributes: unaudited,
        };
        evaluate_governance(&ctx)
    }

    #[test]
    fn test_status_priority() {
        assert_eq!(GovernanceStatus::from_flags(&[]), GovernanceStatus::Ready);
        assert_eq!(
            GovernanceStatus::from_flags(&[flag(Severity::Warning)]),
            GovernanceStatus::Conditional
        );
        assert_eq!(
            GovernanceStatus::from_flags(&[flag(Severity::Warning), flag(Severity::Error)]),
            GovernanceStatus::ReviewNeeded
        );
    }

    #[test]
    fn test_status_serializes_with_space() {
        let json = serde_json::to_string(&GovernanceStatus::ReviewNeeded).unwrap();
        assert_eq!(json, "\"REVIEW NEEDED\"");
        assert_eq!(GovernanceStatus::Ready.to_string(), "READY");
    }

    #[test]
    fn test_utilization_and_classification() {
        assert!((difference_utilization(-0.05, 0.1) - 0.5).abs() < 1e-12);
        assert!((ratio_utilization(0.8, 0.8) - 1.0).abs() < 1e-12);
        assert!((ratio_utilization(1.25, 0.8) - 1.0).abs() < 1e-12);
        assert!((ratio_utilization(0.0, 0.8) - 5.0).abs() < 1e-9);
        assert!((auroc_utilization(0.65, 0.65) - 1.0).abs() < 1e-12);

        assert_eq!(classify(0.5, 0.2), CheckOutcome::Within);
        assert_eq!(classify(0.85, 0.2), CheckOutcome::Near);
        assert_eq!(classify(1.0, 0.2), CheckOutcome::Near);
        assert_eq!(classify(1.0001, 0.2), CheckOutcome::Outside);
    }

    #[test]
    fn test_clean_run_is_ready() {
        let report = run(
            vec![gap(Some(0.02), GapKind::Difference, "equalized_odds_diff")],
            vec![],
        );
        assert!(report.flags.is_empty());
        assert_eq!(report.recommendation.status, GovernanceStatus::Ready);
        // label missingness, race missingness, overall auroc, one gap
        assert_eq!(report.recommendation.within_threshold_count, 4);
        assert!(report.recommendation.advisory.starts_with("All 4"));
    }

    #[test]
    fn test_breach_is_review_needed() {
        let report = run(
            vec![gap(Some(-0.15), GapKind::Difference, "equalized_odds_diff")],
            vec![],
        );
        assert_eq!(report.flags.len(), 1);
        let f = &report.flags[0];
        assert_eq!(f.severity, Severity::Error);
        assert_eq!(f.details.group.as_deref(), Some("B"));
        assert_eq!(f.details.threshold, Some(0.1));
        assert_eq!(report.recommendation.status, GovernanceStatus::ReviewNeeded);
        assert_eq!(report.recommendation.n_errors(), 1);
        assert_eq!(report.recommendation.n_warnings(), 0);
    }

    #[test]
    fn test_near_threshold_is_conditional() {
        let report = run(
            vec![gap(Some(0.83), GapKind::Ratio, "demographic_parity_ratio")],
            vec![],
        );
        assert_eq!(report.flags.len(), 1);
        assert_eq!(report.flags[0].severity, Severity::Warning);
        assert_eq!(report.recommendation.status, GovernanceStatus::Conditional);
    }

    #[test]
    fn test_undersized_group_flagged() {
        let report = run(vec![], vec![ExcludedGroup { name: "C".into(), n: 40 }]);
        assert_eq!(report.flags.len(), 1);
        assert_eq!(report.flags[0].category, FlagCategory::SampleSize);
        assert!(report.flags[0].message.contains("n=40 < 100"));
        assert_eq!(report.recommendation.status, GovernanceStatus::Conditional);
        assert!(report.recommendation.advisory.contains("below minimum sample size"));
    }

    #[test]
    fn test_attribute_without_labeled_values_flagged() {
        let report = run_with_unaudited(vec![], vec![], &["insurance".to_string()]);
        assert_eq!(report.flags.len(), 1);
        let f = &report.flags[0];
        assert_eq!(f.severity, Severity::Warning);
        assert_eq!(f.category, FlagCategory::SampleSize);
        assert_eq!(f.details.attribute.as_deref(), Some("insurance"));
        assert_eq!(f.details.value, Some(0.0));
        assert_eq!(report.recommendation.status, GovernanceStatus::Conditional);
    }

    #[test]
    fn test_unavailable_gap_not_checked() {
        let report = run(vec![gap(None, GapKind::Difference, "calibration_diff")], vec![]);
        assert!(report.flags.is_empty());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_legacy_alias_deserializes() {
        let json = serde_json::json!({
            "status": "CONDITIONAL",
            "advisory": "",
            "n_errors": 0,
            "n_warnings": 2,
            "n_pass": 7
        });
        let rec: GovernanceRecommendation = serde_json::from_value(json).unwrap();
        assert_eq!(rec.near_threshold_count, 2);
        assert_eq!(rec.n_pass(), 7);
    }
}

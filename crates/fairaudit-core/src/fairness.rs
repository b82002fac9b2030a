//! Fairness-gap computation between subgroups and their reference group.
//!
//! A `FairnessMetric` is the user-facing choice ("equalized odds"). Each
//! metric expands to one or more `GapStatistic`s, each producing a single
//! number per (group, reference) pair from two `PerformanceSnapshot`s. A
//! difference gap is `group - reference`; a ratio gap is `group / reference`
//! with a reference of zero yielding 1.0.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::performance::PerformanceSnapshot;
use crate::safe_math::safe_divide;
use crate::types::MaybeMetric;

// ---------------------------------------------------------------------------
// Metric vocabulary
// ---------------------------------------------------------------------------

/// Closed set of fairness criteria an audit can be run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FairnessMetric {
    /// Equal selection rates.
    DemographicParity,
    /// Equal true-positive rates.
    EqualOpportunity,
    /// Equal true- and false-positive rates.
    EqualizedOdds,
    /// Equal positive predictive values.
    PredictiveParity,
    /// Equal calibration-in-the-large.
    CalibrationParity,
}

impl FairnessMetric {
    pub const ALL: [FairnessMetric; 5] = [
        FairnessMetric::DemographicParity,
        FairnessMetric::EqualOpportunity,
        FairnessMetric::EqualizedOdds,
        FairnessMetric::PredictiveParity,
        FairnessMetric::CalibrationParity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FairnessMetric::DemographicParity => "demographic_parity",
            FairnessMetric::EqualOpportunity => "equal_opportunity",
            FairnessMetric::EqualizedOdds => "equalized_odds",
            FairnessMetric::PredictiveParity => "predictive_parity",
            FairnessMetric::CalibrationParity => "calibration_parity",
        }
    }

    /// Gap statistics this criterion is judged on.
    pub fn statistics(&self) -> &'static [GapStatistic] {
        match self {
            FairnessMetric::DemographicParity => &[
                GapStatistic::DemographicParityRatio,
                GapStatistic::DemographicParityDiff,
            ],
            FairnessMetric::EqualOpportunity => &[GapStatistic::EqualOpportunityDiff],
            FairnessMetric::EqualizedOdds => &[GapStatistic::EqualizedOddsDiff],
            FairnessMetric::PredictiveParity => &[GapStatistic::PredictiveParityDiff],
            FairnessMetric::CalibrationParity => &[GapStatistic::CalibrationDiff],
        }
    }
}

impl fmt::Display for FairnessMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FairnessMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        FairnessMetric::ALL
            .into_iter()
            .find(|m| m.as_str() == normalized)
            .ok_or_else(|| format!("unknown fairness metric '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapKind {
    Difference,
    Ratio,
}

// ---------------------------------------------------------------------------
// Gap statistics
// ---------------------------------------------------------------------------

/// A single gap between a subgroup snapshot and the reference snapshot.
pub trait GapMetric {
    /// Stable key, e.g. `"equalized_odds_diff"`. Also the governance
    /// threshold key.
    fn key(&self) -> &'static str;
    fn kind(&self) -> GapKind;
    /// Per-group value the gap is built from (for reporting).
    fn component(&self, snapshot: &PerformanceSnapshot) -> MaybeMetric;
    /// Gap value; `None` when either side is unavailable.
    fn compute(&self, group: &PerformanceSnapshot, reference: &PerformanceSnapshot) -> MaybeMetric;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapStatistic {
    DemographicParityRatio,
    DemographicParityDiff,
    EqualOpportunityDiff,
    EqualizedOddsDiff,
    PredictiveParityDiff,
    CalibrationDiff,
}

impl GapMetric for GapStatistic {
    fn key(&self) -> &'static str {
        match self {
            GapStatistic::DemographicParityRatio => "demographic_parity_ratio",
            GapStatistic::DemographicParityDiff => "demographic_parity_diff",
            GapStatistic::EqualOpportunityDiff => "equal_opportunity_diff",
            GapStatistic::EqualizedOddsDiff => "equalized_odds_diff",
            GapStatistic::PredictiveParityDiff => "predictive_parity_diff",
            GapStatistic::CalibrationDiff => "calibration_diff",
        }
    }

    fn kind(&self) -> GapKind {
        match self {
            GapStatistic::DemographicParityRatio => GapKind::Ratio,
            _ => GapKind::Difference,
        }
    }

    fn component(&self, s: &PerformanceSnapshot) -> MaybeMetric {
        let c = &s.classification_at_threshold;
        match self {
            GapStatistic::DemographicParityRatio | GapStatistic::DemographicParityDiff => {
                Some(c.selection_rate)
            }
            GapStatistic::EqualOpportunityDiff | GapStatistic::EqualizedOddsDiff => {
                Some(c.sensitivity)
            }
            GapStatistic::PredictiveParityDiff => Some(c.ppv),
            GapStatistic::CalibrationDiff => s.observed_minus_expected(),
        }
    }

    fn compute(&self, group: &PerformanceSnapshot, reference: &PerformanceSnapshot) -> MaybeMetric {
        match self {
            GapStatistic::DemographicParityRatio => Some(safe_divide(
                self.component(group)?,
                self.component(reference)?,
                1.0,
            )),
            GapStatistic::EqualizedOddsDiff => {
                let g = &group.classification_at_threshold;
                let r = &reference.classification_at_threshold;
                let tpr_gap = g.sensitivity - r.sensitivity;
                let fpr_gap = g.fpr - r.fpr;
                // Signed value of whichever component is larger in magnitude.
                Some(if fpr_gap.abs() > tpr_gap.abs() { fpr_gap } else { tpr_gap })
            }
            _ => Some(self.component(group)? - self.component(reference)?),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One computed gap for one non-reference group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FairnessGapRecord {
    pub attribute: String,
    pub group: String,
    pub reference: String,
    pub metric: String,
    pub kind: GapKind,
    pub value: MaybeMetric,
    pub group_value: MaybeMetric,
    pub reference_value: MaybeMetric,
    pub n_group: usize,
    pub n_reference: usize,
    pub ci_lower: MaybeMetric,
    pub ci_upper: MaybeMetric,
}

/// Distance of a ratio from parity, symmetric in `r` and `1/r`. A ratio of
/// zero or below is total disparity.
pub fn ratio_disparity(ratio: f64) -> f64 {
    if ratio > 0.0 {
        1.0 - ratio.min(1.0 / ratio)
    } else {
        1.0
    }
}

impl FairnessGapRecord {
    /// Distance from parity: `|value|` for differences, `ratio_disparity`
    /// for ratios.
    pub fn disparity(&self) -> MaybeMetric {
        let v = self.value?;
        Some(match self.kind {
            GapKind::Difference => v.abs(),
            GapKind::Ratio => ratio_disparity(v),
        })
    }
}

/// Worst gap per metric key for one attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapSummary {
    pub value: MaybeMetric,
    pub group: Option<String>,
    pub ci_lower: MaybeMetric,
    pub ci_upper: MaybeMetric,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeFairness {
    pub attribute: String,
    pub reference: String,
    pub gaps: Vec<FairnessGapRecord>,
    /// Keyed by gap key (`"equalized_odds_diff"`).
    pub summary: BTreeMap<String, GapSummary>,
}

impl AttributeFairness {
    pub fn new(attribute: &str, reference: &str, gaps: Vec<FairnessGapRecord>) -> Self {
        let mut out = Self {
            attribute: attribute.to_string(),
            reference: reference.to_string(),
            gaps,
            summary: BTreeMap::new(),
        };
        out.refresh_summary();
        out
    }

    /// Rebuild `summary` from `gaps` (after intervals are attached).
    pub fn refresh_summary(&mut self) {
        let mut summary: BTreeMap<String, GapSummary> = BTreeMap::new();
        let mut worst: BTreeMap<String, f64> = BTreeMap::new();

        for gap in &self.gaps {
            let entry = summary.entry(gap.metric.clone()).or_insert(GapSummary {
                value: None,
                group: None,
                ci_lower: None,
                ci_upper: None,
            });
            let Some(disparity) = gap.disparity() else {
                continue;
            };
            let current = worst.get(&gap.metric).copied();
            if current.is_none_or(|w| disparity > w) {
                worst.insert(gap.metric.clone(), disparity);
                *entry = GapSummary {
                    value: gap.value,
                    group: Some(gap.group.clone()),
                    ci_lower: gap.ci_lower,
                    ci_upper: gap.ci_upper,
                };
            }
        }
        self.summary = summary;
    }
}

// ---------------------------------------------------------------------------
// Computation
// ---------------------------------------------------------------------------

/// Gaps of every eligible non-reference group against the reference.
///
/// `groups` holds the eligible subgroup snapshots including the reference;
/// the reference row is skipped. Output order: group name, then statistic.
pub fn compute_attribute_gaps<M: GapMetric>(
    attribute: &str,
    reference: &str,
    reference_snapshot: &PerformanceSnapshot,
    groups: &BTreeMap<String, PerformanceSnapshot>,
    statistics: &[M],
) -> Vec<FairnessGapRecord> {
    let mut out = Vec::new();
    for (group, snapshot) in groups {
        if group == reference {
            continue;
        }
        for stat in statistics {
            out.push(FairnessGapRecord {
                attribute: attribute.to_string(),
                group: group.clone(),
                reference: reference.to_string(),
                metric: stat.key().to_string(),
                kind: stat.kind(),
                value: stat.compute(snapshot, reference_snapshot),
                group_value: stat.component(snapshot),
                reference_value: stat.component(reference_snapshot),
                n_group: snapshot.n,
                n_reference: reference_snapshot.n,
                ci_lower: None,
                ci_upper: None,
            });
        }
    }
    out
}

/// Deduplicated statistics for a list of metrics, in first-seen order.
pub fn statistics_for(metrics: &[FairnessMetric]) -> Vec<GapStatistic> {
    let mut out: Vec<GapStatistic> = Vec::new();
    for m in metrics {
        for s in m.statistics() {
            if !out.contains(s) {
                out.push(*s);
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

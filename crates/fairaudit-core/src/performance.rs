//! Discrimination, calibration and classification-at-threshold metrics.
//!
//! Covers:
//! 1. **AUROC** -- trapezoidal integration of TPR vs FPR over tied-score blocks.
//! 2. **AUPRC** -- average precision (step interpolation).
//! 3. **Brier score**, **calibration slope / intercept** (logistic recalibration
//!    fit by Newton-Raphson), **O/E ratio**, **Hosmer-Lemeshow** p-value.
//! 4. **Confusion-matrix rates** at the decision threshold, plus decision-curve
//!    net benefit.
//!
//! The same `compute_performance` runs on the whole cohort and on every
//! subgroup slice, so gaps between snapshots are always like-for-like.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::bootstrap::ConfidenceInterval;
use crate::safe_math::safe_divide;
use crate::types::MaybeMetric;

/// Probabilities are clipped to [EPS, 1 - EPS] before taking logits.
const LOGIT_EPS: f64 = 1e-6;
const NEWTON_MAX_ITER: usize = 100;
const NEWTON_TOL: f64 = 1e-10;
/// Coefficients beyond this magnitude indicate (quasi-)separation.
const MAX_COEFFICIENT: f64 = 1e3;
const HL_GROUPS: usize = 10;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Knobs shared by every snapshot in one audit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricOptions {
    /// Predicted positive iff `y_prob >= threshold`.
    pub threshold: f64,
    /// Each class needs at least this many records for discrimination and
    /// calibration fits.
    pub min_class_count: usize,
    /// Value of a rate whose denominator is zero.
    pub rate_default: f64,
}

impl Default for MetricOptions {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            min_class_count: crate::config::DEFAULT_MIN_CLASS_COUNT,
            rate_default: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrimination {
    pub auroc: MaybeMetric,
    pub auprc: MaybeMetric,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub brier_score: MaybeMetric,
    /// Slope `b` of `logit P(y=1) = a + b * logit(p)`. 1.0 is ideal.
    pub calibration_slope: MaybeMetric,
    /// Calibration-in-the-large: `a` of `logit P(y=1) = a + logit(p)`. 0.0 is ideal.
    pub calibration_intercept: MaybeMetric,
    pub mean_predicted: MaybeMetric,
    pub observed_rate: MaybeMetric,
    /// Observed / expected events.
    pub oe_ratio: MaybeMetric,
    pub hosmer_lemeshow_p: MaybeMetric,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationAtThreshold {
    pub threshold: f64,
    pub tp: usize,
    pub fp: usize,
    pub tn: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
    /// TPR, recall.
    pub sensitivity: f64,
    pub specificity: f64,
    pub ppv: f64,
    pub npv: f64,
    pub fpr: f64,
    pub fnr: f64,
    /// Share predicted positive.
    pub selection_rate: f64,
    pub accuracy: f64,
    pub f1: f64,
    /// Decision-curve net benefit at the threshold.
    pub net_benefit: f64,
}

/// Fixed-schema performance of one scope (overall or one subgroup).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub n: usize,
    pub n_positive: usize,
    pub n_negative: usize,
    pub prevalence: f64,
    pub discrimination: Discrimination,
    pub calibration: Calibration,
    pub classification_at_threshold: ClassificationAtThreshold,
    /// Bootstrap intervals keyed by metric name; empty without bootstrap.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub confidence_intervals: BTreeMap<String, ConfidenceInterval>,
}

/// Keys of `PerformanceSnapshot::scalar_metrics`, in order.
pub const SCALAR_METRIC_KEYS: [&str; 14] = [
    "auroc",
    "auprc",
    "brier_score",
    "calibration_slope",
    "calibration_intercept",
    "oe_ratio",
    "observed_minus_expected",
    "sensitivity",
    "specificity",
    "ppv",
    "npv",
    "fpr",
    "selection_rate",
    "net_benefit",
];

impl PerformanceSnapshot {
    /// Flattened view of every scalar metric, in `SCALAR_METRIC_KEYS` order.
    pub fn scalar_metrics(&self) -> [(&'static str, MaybeMetric); 14] {
        let d = &self.discrimination;
        let c = &self.calibration;
        let k = &self.classification_at_threshold;
        [
            ("auroc", d.auroc),
            ("auprc", d.auprc),
            ("brier_score", c.brier_score),
            ("calibration_slope", c.calibration_slope),
            ("calibration_intercept", c.calibration_intercept),
            ("oe_ratio", c.oe_ratio),
            ("observed_minus_expected", self.observed_minus_expected()),
            ("sensitivity", Some(k.sensitivity)),
            ("specificity", Some(k.specificity)),
            ("ppv", Some(k.ppv)),
            ("npv", Some(k.npv)),
            ("fpr", Some(k.fpr)),
            ("selection_rate", Some(k.selection_rate)),
            ("net_benefit", Some(k.net_benefit)),
        ]
    }

    pub fn metric(&self, key: &str) -> MaybeMetric {
        self.scalar_metrics()
            .into_iter()
            .find(|(k, _)| *k == key)
            .and_then(|(_, v)| v)
    }

    /// Observed event rate minus mean predicted risk.
    pub fn observed_minus_expected(&self) -> MaybeMetric {
        Some(self.calibration.observed_rate? - self.calibration.mean_predicted?)
    }
}

// ---------------------------------------------------------------------------
// Core function
// ---------------------------------------------------------------------------

/// Compute the full snapshot for one slice. Rows with a NaN label are
/// dropped; inputs are assumed validated.
pub fn compute_performance(
    y_prob: &[f64],
    y_true: &[f64],
    options: &MetricOptions,
) -> PerformanceSnapshot {
    let pairs: Vec<(f64, bool)> = y_prob
        .iter()
        .zip(y_true.iter())
        .filter(|(_, y)| !y.is_nan())
        .map(|(&p, &y)| (p, y == 1.0))
        .collect();

    let n = pairs.len();
    let n_positive = pairs.iter().filter(|(_, y)| *y).count();
    let n_negative = n - n_positive;
    let both_classes =
        n_positive >= options.min_class_count && n_negative >= options.min_class_count;

    let discrimination = if both_classes {
        Discrimination {
            auroc: Some(auroc(&pairs, n_positive, n_negative)),
            auprc: Some(average_precision(&pairs, n_positive)),
        }
    } else {
        Discrimination {
            auroc: None,
            auprc: None,
        }
    };

    PerformanceSnapshot {
        n,
        n_positive,
        n_negative,
        prevalence: safe_divide(n_positive as f64, n as f64, 0.0),
        discrimination,
        calibration: calibration(&pairs, both_classes),
        classification_at_threshold: classification_at_threshold(&pairs, options),
        confidence_intervals: BTreeMap::new(),
    }
}

// ---------------------------------------------------------------------------
// Discrimination
// ---------------------------------------------------------------------------

fn sorted_desc(pairs: &[(f64, bool)]) -> Vec<(f64, bool)> {
    let mut sorted = pairs.to_vec();
    sorted.sort_by(|a, b| b.0.total_cmp(&a.0));
    sorted
}

/// Area under the ROC curve. Tied scores form one block, which is the same
/// as counting ties as half in the Mann-Whitney statistic.
fn auroc(pairs: &[(f64, bool)], n_pos: usize, n_neg: usize) -> f64 {
    let sorted = sorted_desc(pairs);
    let total_pos = n_pos as f64;
    let total_neg = n_neg as f64;

    let mut auc = 0.0;
    let mut tp = 0.0;
    let mut fp = 0.0;
    let mut prev_tp = 0.0;
    let mut prev_fp = 0.0;

    let mut i = 0usize;
    while i < sorted.len() {
        let score = sorted[i].0;
        while i < sorted.len() && sorted[i].0 == score {
            if sorted[i].1 {
                tp += 1.0;
            } else {
                fp += 1.0;
            }
            i += 1;
        }
        let tpr = tp / total_pos;
        let fpr = fp / total_neg;
        let prev_tpr = prev_tp / total_pos;
        let prev_fpr = prev_fp / total_neg;
        auc += (fpr - prev_fpr) * (tpr + prev_tpr) / 2.0;
        prev_tp = tp;
        prev_fp = fp;
    }

    auc
}

/// Average precision: sum over score blocks of (Δrecall × precision).
fn average_precision(pairs: &[(f64, bool)], n_pos: usize) -> f64 {
    let sorted = sorted_desc(pairs);
    let total_pos = n_pos as f64;

    let mut ap = 0.0;
    let mut tp = 0.0;
    let mut fp = 0.0;
    let mut prev_recall = 0.0;

    let mut i = 0usize;
    while i < sorted.len() {
        let score = sorted[i].0;
        while i < sorted.len() && sorted[i].0 == score {
            if sorted[i].1 {
                tp += 1.0;
            } else {
                fp += 1.0;
            }
            i += 1;
        }
        let recall = tp / total_pos;
        let precision = tp / (tp + fp);
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
    }

    ap
}

// ---------------------------------------------------------------------------
// Calibration
// ---------------------------------------------------------------------------

fn calibration(pairs: &[(f64, bool)], both_classes: bool) -> Calibration {
    let n = pairs.len();
    if n == 0 {
        return Calibration {
            brier_score: None,
            calibration_slope: None,
            calibration_intercept: None,
            mean_predicted: None,
            observed_rate: None,
            oe_ratio: None,
            hosmer_lemeshow_p: None,
        };
    }

    let n_f = n as f64;
    let brier = pairs
        .iter()
        .map(|(p, y)| {
            let d = p - if *y { 1.0 } else { 0.0 };
            d * d
        })
        .sum::<f64>()
        / n_f;
    let mean_predicted = pairs.iter().map(|(p, _)| p).sum::<f64>() / n_f;
    let observed_rate = pairs.iter().filter(|(_, y)| *y).count() as f64 / n_f;
    let oe_ratio = if mean_predicted > 0.0 {
        Some(observed_rate / mean_predicted)
    } else {
        None
    };

    let (calibration_slope, calibration_intercept, hosmer_lemeshow_p) = if both_classes {
        let x: Vec<f64> = pairs.iter().map(|(p, _)| logit(*p)).collect();
        let y: Vec<f64> = pairs.iter().map(|(_, y)| if *y { 1.0 } else { 0.0 }).collect();
        (
            fit_recalibration_slope(&x, &y),
            fit_recalibration_intercept(&x, &y),
            hosmer_lemeshow_p_value(pairs),
        )
    } else {
        (None, None, None)
    };

    Calibration {
        brier_score: Some(brier),
        calibration_slope,
        calibration_intercept,
        mean_predicted: Some(mean_predicted),
        observed_rate: Some(observed_rate),
        oe_ratio,
        hosmer_lemeshow_p,
    }
}

fn logit(p: f64) -> f64 {
    let p = p.clamp(LOGIT_EPS, 1.0 - LOGIT_EPS);
    (p / (1.0 - p)).ln()
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Newton-Raphson fit of `y ~ a + b x`; returns `b`.
fn fit_recalibration_slope(x: &[f64], y: &[f64]) -> MaybeMetric {
    // Start at the identity recalibration (a = 0, b = 1).
    let mut a = 0.0;
    let mut b = 1.0;

    for _ in 0..NEWTON_MAX_ITER {
        let (mut g0, mut g1) = (0.0, 0.0);
        let (mut h00, mut h01, mut h11) = (0.0, 0.0, 0.0);
        for (&xi, &yi) in x.iter().zip(y) {
            let p = sigmoid(a + b * xi);
            let w = p * (1.0 - p);
            let r = yi - p;
            g0 += r;
            g1 += r * xi;
            h00 += w;
            h01 += w * xi;
            h11 += w * xi * xi;
        }

        let det = h00 * h11 - h01 * h01;
        if !(det > 1e-12 * h00 * h11) {
            return None;
        }
        let da = (h11 * g0 - h01 * g1) / det;
        let db = (h00 * g1 - h01 * g0) / det;
        a += da;
        b += db;

        if !a.is_finite()
            || !b.is_finite()
            || a.abs() > MAX_COEFFICIENT
            || b.abs() > MAX_COEFFICIENT
        {
            return None;
        }
        if da.abs().max(db.abs()) < NEWTON_TOL {
            return Some(b);
        }
    }
    None
}

/// Newton-Raphson fit of `y ~ a + offset(x)`; returns `a`.
fn fit_recalibration_intercept(x: &[f64], y: &[f64]) -> MaybeMetric {
    let mut a = 0.0;
    for _ in 0..NEWTON_MAX_ITER {
        let (mut g, mut h) = (0.0, 0.0);
        for (&xi, &yi) in x.iter().zip(y) {
            let p = sigmoid(a + xi);
            g += yi - p;
            h += p * (1.0 - p);
        }
        if !(h > 0.0) {
            return None;
        }
        let da = g / h;
        a += da;
        if !a.is_finite() || a.abs() > MAX_COEFFICIENT {
            return None;
        }
        if da.abs() < NEWTON_TOL {
            return Some(a);
        }
    }
    None
}

/// Hosmer-Lemeshow goodness-of-fit p-value over deciles of predicted risk.
fn hosmer_lemeshow_p_value(pairs: &[(f64, bool)]) -> MaybeMetric {
    let n = pairs.len();
    let groups = HL_GROUPS.min(n);
    if groups < 3 {
        return None;
    }

    let mut sorted = pairs.to_vec();
    sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    let bin_size = n / groups;
    let remainder = n % groups;
    let mut stat = 0.0;
    let mut start = 0usize;

    for g in 0..groups {
        let end = start + bin_size + usize::from(g < remainder);
        let bin = &sorted[start..end];
        let nk = bin.len() as f64;
        let observed = bin.iter().filter(|(_, y)| *y).count() as f64;
        let expected: f64 = bin.iter().map(|(p, _)| p).sum();

        if expected > 0.0 {
            stat += (observed - expected).powi(2) / expected;
        }
        let expected_non = nk - expected;
        if expected_non > 0.0 {
            stat += ((nk - observed) - expected_non).powi(2) / expected_non;
        }
        start = end;
    }

    let df = (groups - 2) as f64;
    let dist = ChiSquared::new(df).ok()?;
    Some((1.0 - dist.cdf(stat)).clamp(0.0, 1.0))
}

// ---------------------------------------------------------------------------
// Classification at threshold
// ---------------------------------------------------------------------------

fn classification_at_threshold(
    pairs: &[(f64, bool)],
    options: &MetricOptions,
) -> ClassificationAtThreshold {
    let t = options.threshold;
    let d = options.rate_default;

    let (mut tp, mut fp, mut tn, mut fn_) = (0usize, 0usize, 0usize, 0usize);
    for &(p, y) in pairs {
        match (p >= t, y) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, false) => tn += 1,
            (false, true) => fn_ += 1,
        }
    }

    let (tp_f, fp_f, tn_f, fn_f) = (tp as f64, fp as f64, tn as f64, fn_ as f64);
    let n = tp_f + fp_f + tn_f + fn_f;

    let net_benefit = if n > 0.0 {
        tp_f / n - fp_f / n * (t / (1.0 - t))
    } else {
        d
    };

    ClassificationAtThreshold {
        threshold: t,
        tp,
        fp,
        tn,
        fn_,
        sensitivity: safe_divide(tp_f, tp_f + fn_f, d),
        specificity: safe_divide(tn_f, tn_f + fp_f, d),
        ppv: safe_divide(tp_f, tp_f + fp_f, d),
        npv: safe_divide(tn_f, tn_f + fn_f, d),
        fpr: safe_divide(fp_f, fp_f + tn_f, d),
        fnr: safe_divide(fn_f, fn_f + tp_f, d),
        selection_rate: safe_divide(tp_f + fp_f, n, d),
        accuracy: safe_divide(tp_f + tn_f, n, d),
        f1: safe_divide(2.0 * tp_f, 2.0 * tp_f + fp_f + fn_f, d),
        net_benefit,
    }
}

// ---------------------------------------------------------------------------
// Metric categories
// ---------------------------------------------------------------------------

/// Reporting category of a performance measure for clinical prediction
/// models (Van Calster et al., 2025).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricCategory {
    Recommended,
    Optional,
    Caution,
    Unknown,
}

const RECOMMENDED_METRICS: &[&str] = &[
    "auroc",
    "calibration_slope",
    "calibration_intercept",
    "oe_ratio",
    "observed_minus_expected",
    "net_benefit",
];

const OPTIONAL_METRICS: &[&str] = &[
    "brier_score",
    "sensitivity",
    "specificity",
    "ppv",
    "npv",
    "fpr",
    "fnr",
    "selection_rate",
];

const CAUTION_METRICS: &[&str] = &["auprc", "accuracy", "f1", "hosmer_lemeshow_p"];

/// Category of a metric by name (case-insensitive).
pub fn metric_category(metric: &str) -> MetricCategory {
    let lower = metric.to_lowercase();
    if RECOMMENDED_METRICS.contains(&lower.as_str()) {
        MetricCategory::Recommended
    } else if OPTIONAL_METRICS.contains(&lower.as_str()) {
        MetricCategory::Optional
    } else if CAUTION_METRICS.contains(&lower.as_str()) {
        MetricCategory::Caution
    } else {
        MetricCategory::Unknown
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Seeded percentile-bootstrap confidence intervals.
//!
//! Every resample draws from its own `StdRng`, seeded from
//! `(master seed, stream path, resample index)` through SplitMix64. A given
//! interval therefore depends only on the master seed and its position, not
//! on the order resamples are evaluated in.
//!
//! Streams used by the audit:
//! - `[0]` -- overall cohort, resampled as a whole.
//! - `[attr + 1, group]` -- one attribute, one group; resampled within the
//!   group so membership is preserved. Gap intervals pair the group's
//!   resample `b` with the reference's resample `b`.

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::fairness::GapMetric;
use crate::performance::{compute_performance, MetricOptions, PerformanceSnapshot};

/// Stream id of the overall-cohort resamples.
pub const OVERALL_STREAM: u64 = 0;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    pub n_bootstrap: u32,
    pub confidence_level: f64,
    pub seed: u64,
    /// An interval needs at least `ceil(fraction * n_bootstrap)` resamples
    /// where the statistic was computable.
    pub min_valid_fraction: f64,
}

impl BootstrapConfig {
    pub fn new(n_bootstrap: u32, confidence_level: f64, seed: u64) -> Self {
        Self {
            n_bootstrap,
            confidence_level,
            seed,
            min_valid_fraction: 0.5,
        }
    }

    fn min_valid(&self) -> usize {
        (self.min_valid_fraction * self.n_bootstrap as f64).ceil() as usize
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    /// Resamples that produced a value.
    pub n_valid: usize,
    pub confidence_level: f64,
}

/// Intervals for one group slice.
pub type MetricIntervals = BTreeMap<String, ConfidenceInterval>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeIntervals {
    /// group -> metric key -> interval
    pub groups: BTreeMap<String, MetricIntervals>,
    /// group -> gap key -> interval
    pub gaps: BTreeMap<String, MetricIntervals>,
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Seeding and resampling
// ---------------------------------------------------------------------------

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Seed of resample `index` on `stream` under `master`.
pub fn derive_seed(master: u64, stream: &[u64], index: u64) -> u64 {
    let mut state = splitmix64(master);
    for s in stream {
        state = splitmix64(state ^ splitmix64(*s));
    }
    splitmix64(state ^ splitmix64(index.wrapping_add(1)))
}

pub fn resample_rng(master: u64, stream: &[u64], index: u64) -> StdRng {
    StdRng::seed_from_u64(derive_seed(master, stream, index))
}

/// `n` indices drawn uniformly with replacement from `0..n`.
pub fn resample_indices(rng: &mut StdRng, n: usize) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    (0..n).map(|_| rng.gen_range(0..n)).collect()
}

fn take(values: &[f64], indices: &[usize]) -> Vec<f64> {
    indices.iter().map(|&i| values[i]).collect()
}

// ---------------------------------------------------------------------------
// Percentile intervals
// ---------------------------------------------------------------------------

/// Linear-interpolated percentile of sorted data, `p` in [0, 100].
fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = rank - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}

/// Percentile interval over the computable resample values, or `None` when
/// fewer than `min_valid` are available.
pub fn percentile_interval(
    mut values: Vec<f64>,
    confidence_level: f64,
    min_valid: usize,
) -> Option<ConfidenceInterval> {
    values.retain(|v| v.is_finite());
    if values.is_empty() || values.len() < min_valid {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let alpha = 1.0 - confidence_level;
    Some(ConfidenceInterval {
        lower: percentile_sorted(&values, 100.0 * alpha / 2.0),
        upper: percentile_sorted(&values, 100.0 * (1.0 - alpha / 2.0)),
        n_valid: values.len(),
        confidence_level,
    })
}

/// Collected resample values per key, plus the set of keys ever seen.
#[derive(Default)]
struct Collector {
    values: BTreeMap<String, Vec<f64>>,
}

impl Collector {
    fn push(&mut self, key: &str, value: Option<f64>) {
        let entry = self.values.entry(key.to_string()).or_default();
        if let Some(v) = value {
            entry.push(v);
        }
    }

    fn finish(
        self,
        config: &BootstrapConfig,
        scope: &str,
        warnings: &mut Vec<String>,
    ) -> MetricIntervals {
        let min_valid = config.min_valid();
        let mut out = BTreeMap::new();
        for (key, values) in self.values {
            let n_valid = values.iter().filter(|v| v.is_finite()).count();
            match percentile_interval(values, config.confidence_level, min_valid) {
                Some(ci) => {
                    out.insert(key, ci);
                }
                None if n_valid > 0 => {
                    tracing::warn!(
                        scope,
                        metric = %key,
                        n_valid,
                        min_valid,
                        "bootstrap interval unavailable"
                    );
                    warnings.push(format!(
                        "{scope}: {key} confidence interval unavailable \
                         ({n_valid} of {} resamples computable, {min_valid} required)",
                        config.n_bootstrap
                    ));
                }
                None => {}
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Drivers
// ---------------------------------------------------------------------------

/// Intervals for every scalar metric of one slice, resampled as a whole.
pub fn bootstrap_performance(
    y_prob: &[f64],
    y_true: &[f64],
    options: &MetricOptions,
    config: &BootstrapConfig,
    stream: &[u64],
    scope: &str,
    warnings: &mut Vec<String>,
) -> MetricIntervals {
    let mut collector = Collector::default();
    for b in 0..config.n_bootstrap as u64 {
        let mut rng = resample_rng(config.seed, stream, b);
        let idx = resample_indices(&mut rng, y_prob.len());
        let snapshot = compute_performance(&take(y_prob, &idx), &take(y_true, &idx), options);
        for (key, value) in snapshot.scalar_metrics() {
            collector.push(key, value);
        }
    }
    collector.finish(config, scope, warnings)
}

/// Per-group metric intervals and per-group gap intervals for one attribute.
///
/// `groups` maps group name to its `(y_prob, y_true)` slice and must contain
/// `reference`. `attribute_stream` is the attribute's stream id; groups get
/// sub-streams by their position in `groups`.
pub fn bootstrap_attribute<M: GapMetric>(
    attribute: &str,
    reference: &str,
    groups: &BTreeMap<String, (Vec<f64>, Vec<f64>)>,
    statistics: &[M],
    options: &MetricOptions,
    config: &BootstrapConfig,
    attribute_stream: u64,
) -> AttributeIntervals {
    let mut metric_collectors: BTreeMap<&str, Collector> = BTreeMap::new();
    let mut gap_collectors: BTreeMap<&str, Collector> = BTreeMap::new();
    let streams: BTreeMap<&str, [u64; 2]> = groups
        .keys()
        .enumerate()
        .map(|(i, g)| (g.as_str(), [attribute_stream, i as u64]))
        .collect();

    for b in 0..config.n_bootstrap as u64 {
        let mut resampled: BTreeMap<&str, PerformanceSnapshot> = BTreeMap::new();
        for (group, (y_prob, y_true)) in groups {
            let mut rng = resample_rng(config.seed, &streams[group.as_str()], b);
            let idx = resample_indices(&mut rng, y_prob.len());
            let snapshot = compute_performance(&take(y_prob, &idx), &take(y_true, &idx), options);
            let collector = metric_collectors.entry(group.as_str()).or_default();
            for (key, value) in snapshot.scalar_metrics() {
                collector.push(key, value);
            }
            resampled.insert(group.as_str(), snapshot);
        }

        let Some(reference_snapshot) = resampled.get(reference) else {
            continue;
        };
        for (group, snapshot) in &resampled {
            if *group == reference {
                continue;
            }
            let collector = gap_collectors.entry(*group).or_default();
            for stat in statistics {
                collector.push(stat.key(), stat.compute(snapshot, reference_snapshot));
            }
        }
    }

    let mut out = AttributeIntervals::default();
    for (group, collector) in metric_collectors {
        let scope = format!("{attribute}={group}");
        let intervals = collector.finish(config, &scope, &mut out.warnings);
        out.groups.insert(group.to_string(), intervals);
    }
    for (group, collector) in gap_collectors {
        let scope = format!("{attribute}={group} vs {reference}");
        let intervals = collector.finish(config, &scope, &mut out.warnings);
        out.gaps.insert(group.to_string(), intervals);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

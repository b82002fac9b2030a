//! The audit pipeline: validate, describe, measure, compare, bootstrap,
//! govern, and freeze the outcome into `AuditResults`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::bootstrap::{
    bootstrap_attribute, bootstrap_performance, BootstrapConfig, OVERALL_STREAM,
};
use crate::cohort::{describe_cohort, resolve_attribute, Cohort};
use crate::config::AuditConfig;
use crate::error::FairAuditError;
use crate::fairness::{compute_attribute_gaps, statistics_for, AttributeFairness};
use crate::governance::{evaluate_governance, GovernanceContext};
use crate::performance::{compute_performance, MetricOptions, PerformanceSnapshot};
use crate::reproducibility::ReproducibilityBundle;
use crate::results::{AuditResults, AuditResultsParts, ExcludedGroup, SubgroupPerformance};
use crate::types::{with_metadata, ComputationOutput};
use crate::validation::{validate_sample_size, validate_threshold};
use crate::FairAuditResult;

/// Fewest labeled records an audit will run on.
pub const MIN_COHORT_SIZE: usize = 10;

pub const DEFAULT_THRESHOLD: f64 = 0.5;

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditInput {
    pub cohort: Cohort,
    #[serde(default)]
    pub config: AuditConfig,
    /// Decision threshold; predicted positive iff `y_prob >= threshold`.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl AuditInput {
    pub fn new(cohort: Cohort, config: AuditConfig) -> Self {
        Self {
            cohort,
            config,
            threshold: DEFAULT_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }
}

fn validate_input(input: &AuditInput) -> FairAuditResult<()> {
    if input.cohort.is_empty() {
        return Err(FairAuditError::InsufficientData(
            "Cohort contains no records".into(),
        ));
    }
    input.cohort.validate()?;
    validate_threshold(input.threshold)?;
    input.config.validate()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Run a full fairness audit.
///
/// Fails only on invalid input. Degenerate slices, failed fits and
/// undersized groups surface as unavailable metrics, warnings and flags.
pub fn run_audit(input: &AuditInput) -> FairAuditResult<ComputationOutput<AuditResults>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    validate_input(input)?;

    let cohort = &input.cohort;
    let config = &input.config;
    let thresholds = &config.thresholds;

    let view = cohort.labeled_view();
    validate_sample_size(view.len(), MIN_COHORT_SIZE, "labeled cohort")?;

    let random_seed = config.random_seed.unwrap_or_else(rand::random);
    let options = MetricOptions {
        threshold: input.threshold,
        min_class_count: config.min_class_count,
        rate_default: 0.0,
    };
    let metrics = config.evaluated_metrics();
    let statistics = statistics_for(&metrics);
    let bootstrap = config
        .bootstrap_ci
        .then(|| BootstrapConfig::new(config.n_bootstrap, config.confidence_level, random_seed));

    info!(
        model = %config.model_name,
        n_total = cohort.len(),
        n_labeled = view.len(),
        threshold = input.threshold,
        random_seed,
        "starting fairness audit"
    );

    if config.sensitive_attributes.is_empty() {
        warnings.push(
            "No sensitive attributes configured; only overall performance was audited".into(),
        );
    }

    // -- Descriptive statistics --
    let descriptive_stats = describe_cohort(cohort, &config.sensitive_attributes);

    // -- Overall performance --
    let mut overall = compute_performance(&view.y_prob, &view.y_true, &options);
    note_unavailable(&overall, "overall", &mut warnings);
    if let Some(bs) = &bootstrap {
        overall.confidence_intervals = bootstrap_performance(
            &view.y_prob,
            &view.y_true,
            &options,
            bs,
            &[OVERALL_STREAM],
            "overall",
            &mut warnings,
        );
    }
    info!(auroc = ?overall.discrimination.auroc, "overall performance computed");

    // -- Subgroups and fairness gaps --
    let min_n = thresholds.min_subgroup_n();
    let mut subgroup_performance = BTreeMap::new();
    let mut fairness_metrics = BTreeMap::new();
    let mut unaudited_attributes: Vec<String> = Vec::new();

    for (attr_idx, spec) in config.sensitive_attributes.iter().enumerate() {
        let resolved = match resolve_attribute(cohort, &view, spec) {
            Ok(resolved) => resolved,
            Err(FairAuditError::InsufficientData(reason)) => {
                warn!(attribute = %spec.name, %reason, "attribute skipped");
                warnings.push(format!("{reason}; attribute not audited"));
                unaudited_attributes.push(spec.name.clone());
                continue;
            }
            Err(e) => return Err(e),
        };

        let mut slices: BTreeMap<String, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
        let mut excluded_groups = Vec::new();
        for (group, positions) in &resolved.groups {
            if positions.len() < min_n {
                warn!(
                    attribute = %resolved.name,
                    group = %group,
                    n = positions.len(),
                    min_n,
                    "subgroup below minimum size"
                );
                excluded_groups.push(ExcludedGroup {
                    name: group.clone(),
                    n: positions.len(),
                });
            } else {
                slices.insert(group.clone(), view.select(positions));
            }
        }

        let mut groups: BTreeMap<String, PerformanceSnapshot> = BTreeMap::new();
        for (group, (y_prob, y_true)) in &slices {
            let snapshot = compute_performance(y_prob, y_true, &options);
            debug!(
                attribute = %resolved.name,
                group = %group,
                n = snapshot.n,
                auroc = ?snapshot.discrimination.auroc,
                "subgroup performance"
            );
            note_unavailable(&snapshot, &format!("{}={group}", resolved.name), &mut warnings);
            groups.insert(group.clone(), snapshot);
        }

        let intervals = bootstrap.as_ref().map(|bs| {
            bootstrap_attribute(
                &resolved.name,
                &resolved.reference,
                &slices,
                &statistics,
                &options,
                bs,
                attr_idx as u64 + 1,
            )
        });

        if let Some(reference_snapshot) = groups.get(&resolved.reference) {
            let mut gaps = compute_attribute_gaps(
                &resolved.name,
                &resolved.reference,
                reference_snapshot,
                &groups,
                &statistics,
            );
            if let Some(intervals) = &intervals {
                for gap in &mut gaps {
                    let ci = intervals
                        .gaps
                        .get(&gap.group)
                        .and_then(|m| m.get(&gap.metric));
                    if let Some(ci) = ci {
                        gap.ci_lower = Some(ci.lower);
                        gap.ci_upper = Some(ci.upper);
                    }
                }
            }
            fairness_metrics.insert(
                resolved.name.clone(),
                AttributeFairness::new(&resolved.name, &resolved.reference, gaps),
            );
        } else {
            warnings.push(format!(
                "{}: reference group '{}' is below the minimum subgroup size; \
                 fairness gaps not computed",
                resolved.name, resolved.reference
            ));
        }

        if let Some(intervals) = intervals {
            for (group, ci) in intervals.groups {
                if let Some(snapshot) = groups.get_mut(&group) {
                    snapshot.confidence_intervals = ci;
                }
            }
            warnings.extend(intervals.warnings);
        }

        subgroup_performance.insert(
            resolved.name.clone(),
            SubgroupPerformance {
                attribute: resolved.name.clone(),
                reference: resolved.reference.clone(),
                threshold: options.threshold,
                groups,
                excluded_groups,
            },
        );
    }

    // -- Governance --
    let attribute_missing: Vec<(String, f64)> = descriptive_stats
        .attributes
        .iter()
        .map(|(name, dist)| (name.clone(), dist.missing_rate))
        .collect();
    let report = evaluate_governance(&GovernanceContext {
        thresholds,
        overall: &overall,
        missing_label_rate: descriptive_stats.cohort_overview.missing_label_rate,
        attribute_missing: &attribute_missing,
        subgroups: &subgroup_performance,
        fairness: &fairness_metrics,
        unaudited_attributes: &unaudited_attributes,
    });
    warnings.extend(report.warnings);

    let results = AuditResults::new(AuditResultsParts {
        config: config.clone(),
        threshold: input.threshold,
        random_seed,
        descriptive_stats,
        overall_performance: overall,
        subgroup_performance,
        fairness_metrics,
        flags: report.flags,
        governance_recommendation: report.recommendation,
        reproducibility: ReproducibilityBundle::capture(config, random_seed),
        warnings: warnings.clone(),
    });

    info!(status = %results.status(), audit_id = results.audit_id(), "audit complete");

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Clinical Model Fairness Audit \
         (disaggregated performance, reference-group gaps, threshold governance)",
        &serde_json::json!({
            "threshold": input.threshold,
            "primary_fairness_metric": config.resolved_primary_metric(),
            "evaluated_metrics": metrics,
            "min_subgroup_n": min_n,
            "min_class_count": config.min_class_count,
            "bootstrap_ci": config.bootstrap_ci,
            "n_bootstrap": config.bootstrap_ci.then_some(config.n_bootstrap),
            "random_seed": random_seed,
        }),
        warnings,
        elapsed,
        results,
    ))
}

fn note_unavailable(snapshot: &PerformanceSnapshot, scope: &str, warnings: &mut Vec<String>) {
    let missing: Vec<&str> = snapshot
        .scalar_metrics()
        .iter()
        .filter(|(_, v)| v.is_none())
        .map(|(k, _)| *k)
        .collect();
    if !missing.is_empty() {
        warnings.push(format!(
            "{scope}: {} unavailable (n={}, positives={})",
            missing.join(", "),
            snapshot.n,
            snapshot.n_positive
        ));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::PatientRecord;
    use crate::config::{GovernanceThresholds, SensitiveAttributeSpec};

    fn record(i: usize, p: f64, y: Option<f64>, sex: &str) -> PatientRecord {
        let mut attributes = BTreeMap::new();
        attributes.insert("sex".to_string(), Some(sex.to_string()));
        PatientRecord {
            case_id: format!("c{i}"),
            y_prob: p,
            y_true: y,
            attributes,
        }
    }

    fn small_input() -> AuditInput {
        let records = (0..60)
            .map(|i| {
                let p = (i % 20) as f64 / 20.0 + 0.025;
                let y = if i % 20 >= 10 { 1.0 } else { 0.0 };
                record(i, p, Some(y), if i % 2 == 0 { "F" } else { "M" })
            })
            .collect();
        let config = AuditConfig {
            sensitive_attributes: vec![SensitiveAttributeSpec::new("sex")],
            thresholds: GovernanceThresholds {
                min_subgroup_n: Some(20),
                ..Default::default()
            },
            random_seed: Some(11),
            ..Default::default()
        };
        AuditInput::new(Cohort::new(records), config)
    }

    #[test]
    fn test_run_audit_envelope() {
        let out = run_audit(&small_input()).unwrap();
        assert!(out.methodology.contains("Fairness Audit"));
        assert_eq!(out.assumptions["random_seed"], 11);
        assert_eq!(out.result.random_seed(), 11);
        assert_eq!(out.result.threshold(), 0.5);
        assert!(out.result.subgroup_performance().contains_key("sex"));
    }

    #[test]
    fn test_reject_bad_probability() {
        let mut input = small_input();
        input.cohort.records[3].y_prob = 1.5;
        let err = run_audit(&input).unwrap_err();
        assert!(matches!(err, FairAuditError::InvalidInput { .. }));
    }

    #[test]
    fn test_reject_bad_threshold() {
        let input = small_input().with_threshold(1.0);
        assert!(run_audit(&input).is_err());
    }

    #[test]
    fn test_reject_empty_cohort() {
        let input = AuditInput::new(Cohort::default(), AuditConfig::default());
        assert!(matches!(
            run_audit(&input).unwrap_err(),
            FairAuditError::InsufficientData(_)
        ));
    }

    #[test]
    fn test_reject_too_few_labels() {
        let mut input = small_input();
        for r in input.cohort.records.iter_mut().skip(5) {
            r.y_true = None;
        }
        assert!(matches!(
            run_audit(&input).unwrap_err(),
            FairAuditError::InsufficientSample { .. }
        ));
    }

    #[test]
    fn test_unknown_attribute_is_error() {
        let mut input = small_input();
        input.config.sensitive_attributes = vec![SensitiveAttributeSpec::new("zip")];
        assert!(run_audit(&input).is_err());
    }

    #[test]
    fn test_generated_seed_is_recorded() {
        let mut input = small_input();
        input.config.random_seed = None;
        let out = run_audit(&input).unwrap();
        let seed = out.result.random_seed();
        assert_eq!(out.result.reproducibility().random_seed, seed);
    }

    #[test]
    fn test_input_deserializes_with_defaults() {
        let json = serde_json::json!({
            "cohort": { "records": [
                { "case_id": "a", "y_prob": 0.2, "y_true": 0.0, "attributes": { "sex": "F" } }
            ]}
        });
        let input: AuditInput = serde_json::from_value(json).unwrap();
        assert_eq!(input.threshold, 0.5);
        assert_eq!(input.config.model_name, "Unnamed model");
    }
}

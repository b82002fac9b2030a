use fairaudit_core::cohort::{Cohort, PatientRecord};
use fairaudit_core::config::{
    AuditConfig, GovernanceThresholds, SensitiveAttributeSpec, UseCaseType,
};
use fairaudit_core::fairness::FairnessMetric;
use fairaudit_core::governance::{FlagCategory, GovernanceStatus, Severity};
use fairaudit_core::results::ExcludedGroup;
use fairaudit_core::{run_audit, AuditInput, AuditResults};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;

// ===========================================================================
// Cohort builder
// ===========================================================================

/// 250 patients on 25 risk levels, roughly calibrated. AUROC = 0.8328.
fn base_block() -> Vec<(f64, f64)> {
    let mut out = Vec::with_capacity(250);
    for k in 0..25u32 {
        let p = (k as f64 + 0.5) / 25.0;
        let positives = (20 * k + 35) / 50;
        for j in 0..10 {
            out.push((p, if j < positives { 1.0 } else { 0.0 }));
        }
    }
    out
}

fn patient(
    id: usize,
    y_prob: f64,
    y_true: f64,
    race: &str,
    insurance: Option<&str>,
) -> PatientRecord {
    let mut attributes = BTreeMap::new();
    attributes.insert("race".to_string(), Some(race.to_string()));
    attributes.insert("insurance".to_string(), insurance.map(str::to_string));
    PatientRecord {
        case_id: format!("P{id:05}"),
        y_prob,
        y_true: Some(y_true),
        attributes,
    }
}

/// race {A, B, C} x insurance {Private, Public}, one block per cell: 1500
/// patients. `race_c_scale` multiplies race C's predicted risk.
fn cohort(race_c_scale: f64) -> Cohort {
    let block = base_block();
    let mut records = Vec::new();
    for race in ["A", "B", "C"] {
        for insurance in ["Private", "Public"] {
            for &(p, y) in &block {
                let p = if race == "C" { p * race_c_scale } else { p };
                records.push(patient(records.len(), p, y, race, Some(insurance)));
            }
        }
    }
    Cohort::new(records)
}

/// The 1500-patient cohort plus 40 patients of race D with no insurance recorded.
fn cohort_with_small_group() -> Cohort {
    let mut cohort = cohort(1.0);
    let block = base_block();
    for i in 0..40 {
        let (p, y) = block[i * 6];
        let id = cohort.len();
        cohort.records.push(patient(id, p, y, "D", None));
    }
    cohort
}

fn config() -> AuditConfig {
    AuditConfig {
        model_name: "30-day readmission".into(),
        model_version: "2.1.0".into(),
        use_case_type: Some(UseCaseType::InterventionTrigger),
        primary_fairness_metric: Some(FairnessMetric::EqualizedOdds),
        sensitive_attributes: vec![
            SensitiveAttributeSpec::new("race"),
            SensitiveAttributeSpec::new("insurance"),
        ],
        random_seed: Some(42),
        ..Default::default()
    }
}

fn audit(cohort: Cohort, config: AuditConfig) -> AuditResults {
    run_audit(&AuditInput::new(cohort, config)).unwrap().result
}

// ===========================================================================
// Scenarios
// ===========================================================================

#[test]
fn test_clean_cohort_is_ready() {
    let mut cfg = config();
    cfg.secondary_fairness_metrics = vec![
        FairnessMetric::DemographicParity,
        FairnessMetric::CalibrationParity,
    ];
    let results = audit(cohort(1.0), cfg);

    assert_eq!(results.status(), GovernanceStatus::Ready);
    assert!(results.flags().is_empty());
    let rec = results.governance_recommendation();
    assert_eq!(rec.n_errors(), 0);
    assert_eq!(rec.n_warnings(), 0);
    assert!(rec.n_pass() > 0);

    let overview = &results.descriptive_stats().cohort_overview;
    assert_eq!(overview.n_total, 1500);
    assert!((overview.prevalence_pct - 50.0).abs() < 1e-9);

    let auroc = results.overall_performance().discrimination.auroc.unwrap();
    assert!((auroc - 0.8328).abs() < 1e-9);

    let race = &results.subgroup_performance()["race"];
    assert_eq!(race.reference, "A");
    assert_eq!(race.groups.len(), 3);
    assert!(race.excluded_groups.is_empty());
    assert_eq!(results.subgroup_performance()["insurance"].reference, "Private");

    let eo = results.fairness_summary("race", "equalized_odds_diff").unwrap();
    assert_eq!(eo.value, Some(0.0));
    let dp = results.fairness_summary("race", "demographic_parity_ratio").unwrap();
    assert_eq!(dp.value, Some(1.0));
    assert!(results.fairness_summary("insurance", "calibration_diff").is_some());
}

#[test]
fn test_single_equalized_odds_breach_needs_review() {
    // C's scores compressed: TPR 0.768 -> 0.296, FPR 0.272 -> 0.024
    let results = audit(cohort(0.6), config());

    assert_eq!(results.flags().len(), 1);
    let flag = &results.flags()[0];
    assert_eq!(flag.severity, Severity::Error);
    assert_eq!(flag.category, FlagCategory::FairnessGap);
    assert_eq!(flag.details.attribute.as_deref(), Some("race"));
    assert_eq!(flag.details.group.as_deref(), Some("C"));
    assert_eq!(flag.details.metric, "equalized_odds_diff");
    assert!((flag.details.value.unwrap() - (0.296 - 0.768)).abs() < 1e-9);

    assert_eq!(results.status(), GovernanceStatus::ReviewNeeded);
    assert_eq!(results.governance_recommendation().n_errors(), 1);

    // a monotone rescaling leaves within-group ranking untouched
    let race = &results.subgroup_performance()["race"];
    let auroc_a = race.groups["A"].discrimination.auroc.unwrap();
    let auroc_c = race.groups["C"].discrimination.auroc.unwrap();
    assert!((auroc_a - auroc_c).abs() < 1e-12);
}

#[test]
fn test_undersized_group_excluded_and_flagged() {
    let results = audit(cohort_with_small_group(), config());

    let race = &results.subgroup_performance()["race"];
    assert_eq!(
        race.excluded_groups,
        vec![ExcludedGroup {
            name: "D".into(),
            n: 40
        }]
    );
    assert!(!race.groups.contains_key("D"));
    assert!(results.fairness_metrics()["race"]
        .gaps
        .iter()
        .all(|g| g.group != "D"));

    assert_eq!(results.flags().len(), 1);
    let flag = &results.flags()[0];
    assert_eq!(flag.category, FlagCategory::SampleSize);
    assert_eq!(flag.severity, Severity::Warning);
    assert_eq!(flag.details.group.as_deref(), Some("D"));
    assert_eq!(results.status(), GovernanceStatus::Conditional);

    let insurance = &results.descriptive_stats().attributes["insurance"];
    assert_eq!(insurance.n_missing, 40);
}

#[test]
fn test_undersized_reference_skips_attribute() {
    let mut cfg = config();
    cfg.sensitive_attributes = vec![SensitiveAttributeSpec::with_reference("race", "D")];
    let results = audit(cohort_with_small_group(), cfg);

    assert!(!results.fairness_metrics().contains_key("race"));
    assert!(results.subgroup_performance()["race"].reference_excluded());
    assert_eq!(results.flags().len(), 1);
    assert!(results.flags()[0].message.contains("reference group"));
    assert!(results
        .warnings()
        .iter()
        .any(|w| w.contains("fairness gaps not computed")));
}

#[test]
fn test_attribute_only_on_unlabeled_records_is_skipped() {
    let mut cohort = cohort(1.0);
    let block = base_block();
    for i in 0..10 {
        let (p, y) = block[i * 20];
        let id = cohort.len();
        let mut record = patient(id, p, y, "A", Some("Private"));
        record.y_true = None;
        record
            .attributes
            .insert("language".to_string(), Some("Spanish".to_string()));
        cohort.records.push(record);
    }
    let mut cfg = config();
    cfg.sensitive_attributes.push(SensitiveAttributeSpec::new("language"));

    let results = run_audit(&AuditInput::new(cohort, cfg)).unwrap().result;

    // the other attributes are still audited
    assert!(results.subgroup_performance().contains_key("race"));
    assert!(results.fairness_metrics().contains_key("insurance"));
    assert!(!results.subgroup_performance().contains_key("language"));
    assert!(!results.fairness_metrics().contains_key("language"));

    let flag = results
        .flags()
        .iter()
        .find(|f| f.category == FlagCategory::SampleSize)
        .unwrap();
    assert_eq!(flag.severity, Severity::Warning);
    assert_eq!(flag.details.attribute.as_deref(), Some("language"));
    assert_eq!(flag.details.value, Some(0.0));
    assert!(results
        .warnings()
        .iter()
        .any(|w| w.contains("'language'") && w.contains("not audited")));
    assert_ne!(results.status(), GovernanceStatus::Ready);
}

#[test]
fn test_subgroup_entries_carry_threshold() {
    let results = run_audit(&AuditInput::new(cohort(1.0), config()).with_threshold(0.4))
        .unwrap()
        .result;
    for subgroup in results.subgroup_performance().values() {
        assert_eq!(subgroup.threshold, 0.4);
    }
    let json = serde_json::to_value(&results).unwrap();
    assert_eq!(json["subgroup_performance"]["race"]["threshold"], 0.4);
}

#[test]
fn test_custom_threshold_overrides_default() {
    let mut cfg = config();
    cfg.thresholds = GovernanceThresholds {
        equalized_odds_diff: Some(0.5),
        ..Default::default()
    };
    // 0.472 of a 0.5 limit: near, not outside
    let results = audit(cohort(0.6), cfg);
    assert_eq!(results.flags().len(), 1);
    assert_eq!(results.flags()[0].severity, Severity::Warning);
    assert_eq!(results.status(), GovernanceStatus::Conditional);
}

#[test]
fn test_missing_labels_over_limit() {
    let mut cohort = cohort(1.0);
    // every 8th label missing: 188 of 1500, 12.5%
    for r in cohort.records.iter_mut().step_by(8) {
        r.y_true = None;
    }
    let results = audit(cohort, config());

    let overview = &results.descriptive_stats().cohort_overview;
    assert_eq!(overview.n_missing_label, 188);
    assert_eq!(overview.n_labeled, 1312);
    let flag = results
        .flags()
        .iter()
        .find(|f| f.category == FlagCategory::Missingness)
        .unwrap();
    assert_eq!(flag.severity, Severity::Error);
    assert_eq!(flag.details.metric, "missing_label_rate");
    assert_eq!(results.status(), GovernanceStatus::ReviewNeeded);
}

// ===========================================================================
// Bootstrap determinism
// ===========================================================================

fn bootstrap_config(seed: u64) -> AuditConfig {
    AuditConfig {
        bootstrap_ci: true,
        n_bootstrap: 25,
        random_seed: Some(seed),
        ..config()
    }
}

#[test]
fn test_bootstrap_same_seed_same_intervals() {
    let a = audit(cohort(0.6), bootstrap_config(7));
    let b = audit(cohort(0.6), bootstrap_config(7));

    assert_eq!(a.overall_performance(), b.overall_performance());
    assert_eq!(a.subgroup_performance(), b.subgroup_performance());
    assert_eq!(a.fairness_metrics(), b.fairness_metrics());
    assert_ne!(a.audit_id(), b.audit_id());

    let auroc_ci = &a.overall_performance().confidence_intervals["auroc"];
    assert!(auroc_ci.lower <= auroc_ci.upper);
    assert_eq!(auroc_ci.n_valid, 25);

    let eo = a.fairness_summary("race", "equalized_odds_diff").unwrap();
    let (lo, hi) = (eo.ci_lower.unwrap(), eo.ci_upper.unwrap());
    assert!(lo <= hi);
    assert!(hi < 0.0);
}

#[test]
fn test_bootstrap_different_seed_different_intervals() {
    let a = audit(cohort(1.0), bootstrap_config(1));
    let b = audit(cohort(1.0), bootstrap_config(2));
    assert_ne!(
        a.overall_performance().confidence_intervals["brier_score"],
        b.overall_performance().confidence_intervals["brier_score"]
    );
    assert_eq!(a.reproducibility().random_seed, 1);
    assert!(a.reproducibility().bootstrap_ci);

    // point estimates do not depend on the seed
    let (pa, pb) = (a.overall_performance(), b.overall_performance());
    assert_eq!(pa.discrimination, pb.discrimination);
    assert_eq!(pa.calibration, pb.calibration);
    assert_eq!(pa.classification_at_threshold, pb.classification_at_threshold);
    let gap_values = |r: &AuditResults| -> Vec<(String, String, Option<f64>)> {
        r.fairness_metrics()
            .values()
            .flat_map(|f| f.gaps.iter())
            .map(|g| (g.group.clone(), g.metric.clone(), g.value))
            .collect()
    };
    assert!(!gap_values(&a).is_empty());
    assert_eq!(gap_values(&a), gap_values(&b));
}

#[test]
fn test_bootstrap_disabled_leaves_intervals_empty() {
    let results = audit(cohort(1.0), config());
    assert!(results.overall_performance().confidence_intervals.is_empty());
    let gap = &results.fairness_metrics()["race"].gaps[0];
    assert_eq!(gap.ci_lower, None);
}

// ===========================================================================
// Serialized shape
// ===========================================================================

#[test]
fn test_results_json_shape() {
    let results = audit(cohort(0.6), config());
    let json = serde_json::to_value(&results).unwrap();

    assert_eq!(json["governance_recommendation"]["status"], "REVIEW NEEDED");
    assert_eq!(json["governance_recommendation"]["outside_threshold_count"], 1);
    assert!(json["overall_performance"]["discrimination"]["auroc"].is_f64());
    assert!(json["overall_performance"]["calibration"]["brier_score"].is_f64());
    assert!(json["overall_performance"]["classification_at_threshold"]["sensitivity"].is_f64());
    assert!(json["fairness_metrics"]["race"]["summary"]["equalized_odds_diff"]["value"].is_f64());
    assert_eq!(json["descriptive_stats"]["cohort_overview"]["n_total"], 1500);
    assert_eq!(json["flags"][0]["severity"], "error");

    let back: AuditResults = serde_json::from_value(json).unwrap();
    assert_eq!(back.status(), GovernanceStatus::ReviewNeeded);
}

//! Typed audit configuration.
//!
//! Every optional knob is a named field with a documented fallback, resolved
//! through an accessor rather than looked up by string key.

use serde::{Deserialize, Serialize};

use crate::error::FairAuditError;
use crate::fairness::FairnessMetric;
use crate::FairAuditResult;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_DEMOGRAPHIC_PARITY_RATIO: f64 = 0.8;
pub const DEFAULT_DEMOGRAPHIC_PARITY_DIFF: f64 = 0.1;
pub const DEFAULT_EQUALIZED_ODDS_DIFF: f64 = 0.1;
pub const DEFAULT_PREDICTIVE_PARITY_DIFF: f64 = 0.1;
pub const DEFAULT_CALIBRATION_DIFF: f64 = 0.05;
pub const DEFAULT_MIN_AUROC: f64 = 0.65;
pub const DEFAULT_MAX_MISSING_RATE: f64 = 0.10;
pub const DEFAULT_MIN_SUBGROUP_N: usize = 100;
pub const DEFAULT_NEAR_THRESHOLD_MARGIN: f64 = 0.2;

pub const DEFAULT_N_BOOTSTRAP: u32 = 1000;
pub const MIN_N_BOOTSTRAP: u32 = 10;
pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;
pub const DEFAULT_MIN_CLASS_COUNT: usize = 5;

// ---------------------------------------------------------------------------
// Use case
// ---------------------------------------------------------------------------

/// How the model's output is acted upon clinically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UseCaseType {
    /// Score above threshold triggers an intervention (care management, outreach).
    InterventionTrigger,
    /// Score is shown to clinicians or patients as a risk estimate.
    RiskCommunication,
    /// Score ranks patients for a scarce resource.
    ResourceAllocation,
    /// Score flags patients for further diagnostic workup.
    Screening,
}

impl UseCaseType {
    /// Fairness metric family that matches the harm model of this use case.
    pub fn recommended_metric(self) -> FairnessMetric {
        match self {
            UseCaseType::InterventionTrigger => FairnessMetric::EqualizedOdds,
            UseCaseType::RiskCommunication => FairnessMetric::CalibrationParity,
            UseCaseType::ResourceAllocation => FairnessMetric::DemographicParity,
            UseCaseType::Screening => FairnessMetric::EqualOpportunity,
        }
    }

    pub fn rationale(self) -> &'static str {
        match self {
            UseCaseType::InterventionTrigger => {
                "Intervention triggers should offer equal opportunity for benefit \
                 and equal burden of false alarms across groups."
            }
            UseCaseType::RiskCommunication => {
                "Communicated risks must mean the same thing for every group, \
                 so calibration must hold within groups."
            }
            UseCaseType::ResourceAllocation => {
                "Scarce resources should be offered at comparable rates across groups."
            }
            UseCaseType::Screening => {
                "Screening should miss true cases at the same rate in every group."
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Sensitive attributes
// ---------------------------------------------------------------------------

/// A sensitive attribute to audit, optionally with an explicit reference group.
/// Without one the largest observed group becomes the reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitiveAttributeSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl SensitiveAttributeSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reference: None,
        }
    }

    pub fn with_reference(name: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reference: Some(reference.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Governance thresholds
// ---------------------------------------------------------------------------

/// Governance limits. Every field is optional; accessors apply the fallback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceThresholds {
    /// Lower bound on the selection-rate ratio (four-fifths rule). Default 0.8.
    /// The mirrored upper bound `1 / limit` applies too.
    pub demographic_parity_ratio: Option<f64>,
    /// Max |selection-rate difference|. Default 0.1.
    pub demographic_parity_diff: Option<f64>,
    /// Max equalized-odds difference. Default 0.1.
    pub equalized_odds_diff: Option<f64>,
    /// Max |TPR difference|. Falls back to `equalized_odds_diff`.
    pub equal_opportunity_diff: Option<f64>,
    /// Max |PPV difference|. Default 0.1.
    pub predictive_parity_diff: Option<f64>,
    /// Max |calibration-in-the-large difference|. Default 0.05.
    pub calibration_diff: Option<f64>,
    /// Minimum acceptable AUROC, overall and per subgroup. Default 0.65.
    pub min_auroc: Option<f64>,
    /// Maximum fraction of missing labels or attribute values. Default 0.10.
    pub max_missing_rate: Option<f64>,
    /// Subgroups smaller than this are excluded from gap computation. Default 100.
    pub min_subgroup_n: Option<usize>,
    /// Fraction of the limit treated as "near threshold". Default 0.2.
    pub near_threshold_margin: Option<f64>,
}

impl GovernanceThresholds {
    pub fn demographic_parity_ratio(&self) -> f64 {
        self.demographic_parity_ratio
            .unwrap_or(DEFAULT_DEMOGRAPHIC_PARITY_RATIO)
    }

    pub fn demographic_parity_diff(&self) -> f64 {
        self.demographic_parity_diff
            .unwrap_or(DEFAULT_DEMOGRAPHIC_PARITY_DIFF)
    }

    pub fn equalized_odds_diff(&self) -> f64 {
        self.equalized_odds_diff.unwrap_or(DEFAULT_EQUALIZED_ODDS_DIFF)
    }

    pub fn equal_opportunity_diff(&self) -> f64 {
        self.equal_opportunity_diff
            .unwrap_or_else(|| self.equalized_odds_diff())
    }

    pub fn predictive_parity_diff(&self) -> f64 {
        self.predictive_parity_diff
            .unwrap_or(DEFAULT_PREDICTIVE_PARITY_DIFF)
    }

    pub fn calibration_diff(&self) -> f64 {
        self.calibration_diff.unwrap_or(DEFAULT_CALIBRATION_DIFF)
    }

    pub fn min_auroc(&self) -> f64 {
        self.min_auroc.unwrap_or(DEFAULT_MIN_AUROC)
    }

    pub fn max_missing_rate(&self) -> f64 {
        self.max_missing_rate.unwrap_or(DEFAULT_MAX_MISSING_RATE)
    }

    pub fn min_subgroup_n(&self) -> usize {
        self.min_subgroup_n.unwrap_or(DEFAULT_MIN_SUBGROUP_N)
    }

    pub fn near_threshold_margin(&self) -> f64 {
        self.near_threshold_margin
            .unwrap_or(DEFAULT_NEAR_THRESHOLD_MARGIN)
    }

    /// Limit for a gap statistic, looked up by its stable key.
    pub fn limit_for(&self, key: &str) -> Option<f64> {
        match key {
            "demographic_parity_ratio" => Some(self.demographic_parity_ratio()),
            "demographic_parity_diff" => Some(self.demographic_parity_diff()),
            "equalized_odds_diff" => Some(self.equalized_odds_diff()),
            "equal_opportunity_diff" => Some(self.equal_opportunity_diff()),
            "predictive_parity_diff" => Some(self.predictive_parity_diff()),
            "calibration_diff" => Some(self.calibration_diff()),
            _ => None,
        }
    }

    fn validate(&self) -> FairAuditResult<()> {
        let ratio = self.demographic_parity_ratio();
        if !(ratio > 0.0 && ratio < 1.0) {
            return Err(invalid(
                "thresholds.demographic_parity_ratio",
                format!("Must be in (0, 1), got {ratio}"),
            ));
        }
        for (field, value) in [
            ("thresholds.demographic_parity_diff", self.demographic_parity_diff()),
            ("thresholds.equalized_odds_diff", self.equalized_odds_diff()),
            ("thresholds.equal_opportunity_diff", self.equal_opportunity_diff()),
            ("thresholds.predictive_parity_diff", self.predictive_parity_diff()),
            ("thresholds.calibration_diff", self.calibration_diff()),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(invalid(field, format!("Must be positive, got {value}")));
            }
        }
        let min_auroc = self.min_auroc();
        if !(0.0..1.0).contains(&min_auroc) {
            return Err(invalid(
                "thresholds.min_auroc",
                format!("Must be in [0, 1), got {min_auroc}"),
            ));
        }
        let missing = self.max_missing_rate();
        if !(missing > 0.0 && missing <= 1.0) {
            return Err(invalid(
                "thresholds.max_missing_rate",
                format!("Must be in (0, 1], got {missing}"),
            ));
        }
        if self.min_subgroup_n() == 0 {
            return Err(invalid(
                "thresholds.min_subgroup_n",
                "Must be at least 1".to_string(),
            ));
        }
        let margin = self.near_threshold_margin();
        if !(0.0..1.0).contains(&margin) {
            return Err(invalid(
                "thresholds.near_threshold_margin",
                format!("Must be in [0, 1), got {margin}"),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Audit configuration
// ---------------------------------------------------------------------------

/// Full configuration of one audit run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub model_name: String,
    pub model_version: String,
    pub organization_name: Option<String>,
    pub use_case_type: Option<UseCaseType>,
    pub intended_use: Option<String>,
    pub intended_population: Option<String>,
    pub out_of_scope: Vec<String>,
    /// Falls back to the use case's recommendation, then to equalized odds.
    pub primary_fairness_metric: Option<FairnessMetric>,
    pub secondary_fairness_metrics: Vec<FairnessMetric>,
    pub fairness_justification: Option<String>,
    pub sensitive_attributes: Vec<SensitiveAttributeSpec>,
    pub thresholds: GovernanceThresholds,
    pub bootstrap_ci: bool,
    pub n_bootstrap: u32,
    pub confidence_level: f64,
    /// Generated and recorded in the results when absent.
    pub random_seed: Option<u64>,
    /// Minimum count of each class before discrimination/calibration fits run.
    pub min_class_count: usize,
    pub report_date: Option<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            model_name: "Unnamed model".to_string(),
            model_version: "unversioned".to_string(),
            organization_name: None,
            use_case_type: None,
            intended_use: None,
            intended_population: None,
            out_of_scope: Vec::new(),
            primary_fairness_metric: None,
            secondary_fairness_metrics: Vec::new(),
            fairness_justification: None,
            sensitive_attributes: Vec::new(),
            thresholds: GovernanceThresholds::default(),
            bootstrap_ci: false,
            n_bootstrap: DEFAULT_N_BOOTSTRAP,
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
            random_seed: None,
            min_class_count: DEFAULT_MIN_CLASS_COUNT,
            report_date: None,
        }
    }
}

impl AuditConfig {
    pub fn resolved_primary_metric(&self) -> FairnessMetric {
        self.primary_fairness_metric
            .or_else(|| self.use_case_type.map(UseCaseType::recommended_metric))
            .unwrap_or(FairnessMetric::EqualizedOdds)
    }

    /// Primary metric first, then secondaries in configured order, without duplicates.
    pub fn evaluated_metrics(&self) -> Vec<FairnessMetric> {
        let mut metrics = vec![self.resolved_primary_metric()];
        for m in &self.secondary_fairness_metrics {
            if !metrics.contains(m) {
                metrics.push(*m);
            }
        }
        metrics
    }

    pub fn validate(&self) -> FairAuditResult<()> {
        self.thresholds.validate()?;

        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(invalid(
                "confidence_level",
                format!("Must be in (0, 1), got {}", self.confidence_level),
            ));
        }
        if self.bootstrap_ci && self.n_bootstrap < MIN_N_BOOTSTRAP {
            return Err(invalid(
                "n_bootstrap",
                format!("Must be at least {MIN_N_BOOTSTRAP} when bootstrap_ci is enabled"),
            ));
        }
        if self.min_class_count == 0 {
            return Err(invalid("min_class_count", "Must be at least 1".to_string()));
        }

        let mut seen: Vec<&str> = Vec::with_capacity(self.sensitive_attributes.len());
        for attr in &self.sensitive_attributes {
            if attr.name.trim().is_empty() {
                return Err(invalid(
                    "sensitive_attributes",
                    "Attribute name must not be empty".to_string(),
                ));
            }
            if seen.contains(&attr.name.as_str()) {
                return Err(invalid(
                    "sensitive_attributes",
                    format!("Attribute '{}' listed more than once", attr.name),
                ));
            }
            seen.push(&attr.name);
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> FairAuditError {
    FairAuditError::InvalidInput {
        field: field.into(),
        reason,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_fallbacks() {
        let t = GovernanceThresholds::default();
        assert_eq!(t.demographic_parity_ratio(), 0.8);
        assert_eq!(t.equalized_odds_diff(), 0.1);
        assert_eq!(t.calibration_diff(), 0.05);
        assert_eq!(t.min_subgroup_n(), 100);
    }

    #[test]
    fn test_equal_opportunity_falls_back_to_equalized_odds() {
        let t = GovernanceThresholds {
            equalized_odds_diff: Some(0.07),
            ..Default::default()
        };
        assert_eq!(t.equal_opportunity_diff(), 0.07);

        let t = GovernanceThresholds {
            equalized_odds_diff: Some(0.07),
            equal_opportunity_diff: Some(0.03),
            ..Default::default()
        };
        assert_eq!(t.equal_opportunity_diff(), 0.03);
    }

    #[test]
    fn test_limit_for_unknown_key() {
        assert!(GovernanceThresholds::default().limit_for("accuracy").is_none());
    }

    #[test]
    fn test_primary_metric_resolution() {
        let mut config = AuditConfig::default();
        assert_eq!(config.resolved_primary_metric(), FairnessMetric::EqualizedOdds);

        config.use_case_type = Some(UseCaseType::RiskCommunication);
        assert_eq!(
            config.resolved_primary_metric(),
            FairnessMetric::CalibrationParity
        );

        config.primary_fairness_metric = Some(FairnessMetric::DemographicParity);
        assert_eq!(
            config.resolved_primary_metric(),
            FairnessMetric::DemographicParity
        );
    }

    #[test]
    fn test_evaluated_metrics_dedup() {
        let config = AuditConfig {
            primary_fairness_metric: Some(FairnessMetric::EqualizedOdds),
            secondary_fairness_metrics: vec![
                FairnessMetric::DemographicParity,
                FairnessMetric::EqualizedOdds,
            ],
            ..Default::default()
        };
        assert_eq!(
            config.evaluated_metrics(),
            vec![FairnessMetric::EqualizedOdds, FairnessMetric::DemographicParity]
        );
    }

    #[test]
    fn test_reject_bad_ratio_threshold() {
        let config = AuditConfig {
            thresholds: GovernanceThresholds {
                demographic_parity_ratio: Some(1.2),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_small_bootstrap() {
        let config = AuditConfig {
            bootstrap_ci: true,
            n_bootstrap: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_duplicate_attribute() {
        let config = AuditConfig {
            sensitive_attributes: vec![
                SensitiveAttributeSpec::new("race"),
                SensitiveAttributeSpec::new("race"),
            ],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let json = r#"{
            "model_name": "Readmission Risk",
            "primary_fairness_metric": "equalized_odds",
            "thresholds": { "equalized_odds_diff": 0.08 }
        }"#;
        let config: AuditConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.model_name, "Readmission Risk");
        assert_eq!(config.thresholds.equalized_odds_diff(), 0.08);
        assert_eq!(config.thresholds.min_auroc(), DEFAULT_MIN_AUROC);
        assert_eq!(config.n_bootstrap, DEFAULT_N_BOOTSTRAP);
        assert!(config.validate().is_ok());
    }
}

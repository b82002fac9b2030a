use clap::Args;
use serde_json::Value;

use fairaudit_core::audit::{self, AuditInput};
use fairaudit_core::config::{AuditConfig, SensitiveAttributeSpec};
use fairaudit_core::fairness::FairnessMetric;

use super::cohort::CohortSource;
use crate::input;

#[derive(Args)]
pub struct AuditArgs {
    /// Complete audit input as JSON: `{ "cohort": ..., "config": ..., "threshold": ... }`
    #[arg(long, conflicts_with_all = ["cohort", "config"])]
    pub input: Option<String>,

    #[command(flatten)]
    pub source: CohortSource,

    /// Audit configuration (.json, .yaml or .yml)
    #[arg(long)]
    pub config: Option<String>,

    /// Sensitive attribute to audit, as `name` or `name=reference` (repeatable)
    #[arg(long = "attribute")]
    pub attributes: Vec<String>,

    /// Primary fairness metric, e.g. equalized_odds
    #[arg(long)]
    pub metric: Option<FairnessMetric>,

    /// Decision threshold; predicted positive iff y_prob >= threshold
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Compute bootstrap confidence intervals
    #[arg(long)]
    pub bootstrap: bool,

    /// Number of bootstrap resamples
    #[arg(long)]
    pub n_bootstrap: Option<u32>,

    /// Random seed for the bootstrap
    #[arg(long)]
    pub seed: Option<u64>,
}

fn parse_attribute(raw: &str) -> SensitiveAttributeSpec {
    match raw.split_once('=') {
        Some((name, reference)) => {
            SensitiveAttributeSpec::with_reference(name.trim(), reference.trim())
        }
        None => SensitiveAttributeSpec::new(raw.trim()),
    }
}

fn load_input(args: &AuditArgs) -> Result<AuditInput, Box<dyn std::error::Error>> {
    if let Some(ref path) = args.input {
        return input::file::read_structured(path);
    }
    if args.source.cohort.is_none() && args.config.is_none() {
        if let Some(data) = input::stdin::read_stdin::<AuditInput>()? {
            return Ok(data);
        }
        return Err("--input <file.json>, --cohort <file>, or stdin required".into());
    }

    let cohort = args.source.load()?;
    let config: AuditConfig = match args.config {
        Some(ref path) => input::file::read_structured(path)?,
        None => AuditConfig::default(),
    };
    Ok(AuditInput::new(cohort, config))
}

/// Command-line flags win over values from files.
fn apply_overrides(args: &AuditArgs, mut input: AuditInput) -> AuditInput {
    if !args.attributes.is_empty() {
        input.config.sensitive_attributes =
            args.attributes.iter().map(|a| parse_attribute(a)).collect();
    }
    if let Some(metric) = args.metric {
        input.config.primary_fairness_metric = Some(metric);
    }
    if let Some(threshold) = args.threshold {
        input.threshold = threshold;
    }
    if args.bootstrap {
        input.config.bootstrap_ci = true;
    }
    if let Some(n) = args.n_bootstrap {
        input.config.n_bootstrap = n;
    }
    if let Some(seed) = args.seed {
        input.config.random_seed = Some(seed);
    }
    input
}

pub fn run_audit(args: AuditArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let input_data = apply_overrides(&args, load_input(&args)?);
    tracing::info!(
        model = %input_data.config.model_name,
        n = input_data.cohort.len(),
        attributes = input_data.config.sensitive_attributes.len(),
        "starting audit"
    );
    let result = audit::run_audit(&input_data)?;
    Ok(serde_json::to_value(result)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_attribute_with_reference() {
        let spec = parse_attribute("race = White");
        assert_eq!(spec.name, "race");
        assert_eq!(spec.reference.as_deref(), Some("White"));

        let spec = parse_attribute("sex");
        assert_eq!(spec.name, "sex");
        assert_eq!(spec.reference, None);
    }
}

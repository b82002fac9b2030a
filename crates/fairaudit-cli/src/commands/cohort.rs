use clap::Args;
use serde_json::Value;

use fairaudit_core::cohort::{describe_cohort, suggest_sensitive_attributes, Cohort};
use fairaudit_core::config::SensitiveAttributeSpec;

use crate::input;
use crate::input::cohort_csv::CsvColumns;

/// Where the cohort comes from and how its CSV columns are named.
#[derive(Args, Debug, Clone)]
pub struct CohortSource {
    /// Cohort file (.csv, or .json with a `records` array)
    #[arg(long)]
    pub cohort: Option<String>,

    /// CSV column with predicted probabilities
    #[arg(long, default_value = "y_prob")]
    pub prob_column: String,

    /// CSV column with observed outcomes (0/1, blank or NA when missing)
    #[arg(long, default_value = "y_true")]
    pub label_column: String,

    /// CSV column with case identifiers
    #[arg(long)]
    pub id_column: Option<String>,
}

impl CohortSource {
    pub fn columns(&self) -> CsvColumns {
        CsvColumns {
            prob: self.prob_column.clone(),
            label: self.label_column.clone(),
            id: self.id_column.clone(),
        }
    }

    /// Cohort from `--cohort`, else from JSON on stdin.
    pub fn load(&self) -> Result<Cohort, Box<dyn std::error::Error>> {
        if let Some(ref path) = self.cohort {
            let cohort = input::cohort_csv::read_cohort(path, &self.columns())?;
            tracing::debug!(path = %path, n = cohort.len(), "cohort loaded");
            Ok(cohort)
        } else if let Some(cohort) = input::stdin::read_stdin::<Cohort>()? {
            Ok(cohort)
        } else {
            Err("--cohort <file.csv|file.json> or stdin required".into())
        }
    }
}

#[derive(Args)]
pub struct DescribeArgs {
    #[command(flatten)]
    pub source: CohortSource,

    /// Sensitive attribute to break down by (repeatable)
    #[arg(long = "attribute", required = true)]
    pub attributes: Vec<String>,
}

#[derive(Args)]
pub struct SuggestAttributesArgs {
    #[command(flatten)]
    pub source: CohortSource,
}

pub fn run_describe(args: DescribeArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let cohort = args.source.load()?;
    let specs: Vec<SensitiveAttributeSpec> = args
        .attributes
        .iter()
        .map(SensitiveAttributeSpec::new)
        .collect();
    let stats = describe_cohort(&cohort, &specs);
    Ok(serde_json::to_value(stats)?)
}

pub fn run_suggest_attributes(
    args: SuggestAttributesArgs,
) -> Result<Value, Box<dyn std::error::Error>> {
    let cohort = args.source.load()?;
    let suggestions = suggest_sensitive_attributes(&cohort);
    Ok(serde_json::to_value(suggestions)?)
}

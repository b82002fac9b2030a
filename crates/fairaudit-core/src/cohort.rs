//! Patient cohort, sensitive-attribute resolution and descriptive statistics.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::SensitiveAttributeSpec;
use crate::error::FairAuditError;
use crate::safe_math::safe_divide;
use crate::validation::{validate_binary_array, validate_probability_array};
use crate::FairAuditResult;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One patient: a prediction, an outcome that may be missing, and the
/// patient's sensitive-attribute values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub case_id: String,
    pub y_prob: f64,
    /// `None` or NaN marks a missing outcome.
    #[serde(default)]
    pub y_true: Option<f64>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Option<String>>,
}

impl PatientRecord {
    /// Label as f64 with NaN for "missing", the encoding the validators expect.
    pub fn label_or_nan(&self) -> f64 {
        self.y_true.unwrap_or(f64::NAN)
    }

    pub fn is_labeled(&self) -> bool {
        self.y_true.is_some_and(|v| !v.is_nan())
    }

    /// Attribute value, treating blank strings as missing.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .and_then(|v| v.as_deref())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// Ordered collection of patient records. Treated as immutable for the
/// duration of an audit run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cohort {
    pub records: Vec<PatientRecord>,
}

impl Cohort {
    pub fn new(records: Vec<PatientRecord>) -> Self {
        Self { records }
    }

    /// Build a cohort from column vectors. NaN in `y_true` marks a missing
    /// label; `None` in an attribute column marks a missing value. Case ids
    /// default to the row index.
    pub fn from_columns(
        case_ids: Option<Vec<String>>,
        y_prob: Vec<f64>,
        y_true: Vec<f64>,
        attributes: BTreeMap<String, Vec<Option<String>>>,
    ) -> FairAuditResult<Self> {
        let n = y_prob.len();
        if y_true.len() != n {
            return Err(length_mismatch("y_true", y_true.len(), n));
        }
        if let Some(ids) = &case_ids {
            if ids.len() != n {
                return Err(length_mismatch("case_ids", ids.len(), n));
            }
        }
        for (name, column) in &attributes {
            if column.len() != n {
                return Err(length_mismatch(name, column.len(), n));
            }
        }

        let records = (0..n)
            .map(|i| PatientRecord {
                case_id: case_ids
                    .as_ref()
                    .map(|ids| ids[i].clone())
                    .unwrap_or_else(|| i.to_string()),
                y_prob: y_prob[i],
                y_true: if y_true[i].is_nan() {
                    None
                } else {
                    Some(y_true[i])
                },
                attributes: attributes
                    .iter()
                    .map(|(name, column)| (name.clone(), column[i].clone()))
                    .collect(),
            })
            .collect();

        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn y_prob(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.y_prob).collect()
    }

    pub fn y_true(&self) -> Vec<f64> {
        self.records.iter().map(PatientRecord::label_or_nan).collect()
    }

    /// Every attribute name present on at least one record.
    pub fn attribute_names(&self) -> BTreeSet<String> {
        self.records
            .iter()
            .flat_map(|r| r.attributes.keys().cloned())
            .collect()
    }

    /// Reject malformed probabilities or labels. Missing labels are allowed.
    pub fn validate(&self) -> FairAuditResult<()> {
        if self.is_empty() {
            return Err(FairAuditError::InsufficientData(
                "Cohort must contain at least one record".into(),
            ));
        }
        validate_probability_array(&self.y_prob())?;
        validate_binary_array(&self.y_true())?;
        Ok(())
    }

    /// Labeled records as parallel (probability, label) columns plus the
    /// index of each row in `records`.
    pub fn labeled_view(&self) -> LabeledView {
        let mut view = LabeledView::default();
        for (idx, r) in self.records.iter().enumerate() {
            if let Some(label) = r.y_true.filter(|v| !v.is_nan()) {
                view.y_prob.push(r.y_prob);
                view.y_true.push(label);
                view.record_index.push(idx);
            }
        }
        view
    }
}

fn length_mismatch(column: &str, got: usize, expected: usize) -> FairAuditError {
    FairAuditError::InvalidInput {
        field: column.to_string(),
        reason: format!("Column has {got} values, expected {expected}"),
    }
}

/// Labeled subset of a cohort in column form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabeledView {
    pub y_prob: Vec<f64>,
    pub y_true: Vec<f64>,
    pub record_index: Vec<usize>,
}

impl LabeledView {
    pub fn len(&self) -> usize {
        self.y_prob.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y_prob.is_empty()
    }

    /// Gather the rows at `positions` (positions into this view, repeats allowed).
    pub fn select(&self, positions: &[usize]) -> (Vec<f64>, Vec<f64>) {
        let probs = positions.iter().map(|&i| self.y_prob[i]).collect();
        let labels = positions.iter().map(|&i| self.y_true[i]).collect();
        (probs, labels)
    }
}

// ---------------------------------------------------------------------------
// Attribute resolution
// ---------------------------------------------------------------------------

/// A sensitive attribute with its observed groups and chosen reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAttribute {
    pub name: String,
    pub reference: String,
    /// Whether the reference came from configuration rather than group size.
    pub reference_is_explicit: bool,
    /// Positions into the labeled view, per observed category.
    pub groups: BTreeMap<String, Vec<usize>>,
    /// Records (labeled or not) with no value for this attribute.
    pub n_missing: usize,
}

impl ResolvedAttribute {
    pub fn group_size(&self, group: &str) -> usize {
        self.groups.get(group).map_or(0, Vec::len)
    }

    pub fn reference_positions(&self) -> &[usize] {
        self.groups
            .get(&self.reference)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Split the labeled view by one attribute and pick the reference group.
///
/// The reference is the configured one if given (it must be observed),
/// otherwise the largest group; ties go to the lexicographically first name.
pub fn resolve_attribute(
    cohort: &Cohort,
    view: &LabeledView,
    spec: &SensitiveAttributeSpec,
) -> FairAuditResult<ResolvedAttribute> {
    let present = cohort
        .records
        .iter()
        .any(|r| r.attributes.contains_key(&spec.name));
    if !present {
        return Err(FairAuditError::InvalidInput {
            field: format!("sensitive_attributes.{}", spec.name),
            reason: "Attribute is not present on any cohort record".into(),
        });
    }

    let n_missing = cohort
        .records
        .iter()
        .filter(|r| r.attribute(&spec.name).is_none())
        .count();

    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (pos, &record_idx) in view.record_index.iter().enumerate() {
        if let Some(value) = cohort.records[record_idx].attribute(&spec.name) {
            groups.entry(value.to_string()).or_default().push(pos);
        }
    }

    if groups.is_empty() {
        return Err(FairAuditError::InsufficientData(format!(
            "Attribute '{}' has no labeled records with a value",
            spec.name
        )));
    }

    let (reference, reference_is_explicit) = match &spec.reference {
        Some(r) => {
            if !groups.contains_key(r) {
                return Err(FairAuditError::InvalidInput {
                    field: format!("sensitive_attributes.{}.reference", spec.name),
                    reason: format!("Reference group '{r}' is not observed among labeled records"),
                });
            }
            (r.clone(), true)
        }
        None => {
            // BTreeMap iterates in name order; keep the first of equal-sized groups.
            let mut best: Option<(&String, usize)> = None;
            for (name, members) in &groups {
                if best.is_none_or(|(_, n)| members.len() > n) {
                    best = Some((name, members.len()));
                }
            }
            let name = best.map(|(n, _)| n.clone()).unwrap_or_default();
            (name, false)
        }
    };

    Ok(ResolvedAttribute {
        name: spec.name.clone(),
        reference,
        reference_is_explicit,
        groups,
        n_missing,
    })
}

// ---------------------------------------------------------------------------
// Descriptive statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortOverview {
    pub n_total: usize,
    pub n_labeled: usize,
    pub n_missing_label: usize,
    pub missing_label_rate: f64,
    pub n_positive: usize,
    /// Outcome prevalence among labeled records, in percent.
    pub prevalence_pct: f64,
    pub mean_predicted: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupCount {
    pub n: usize,
    /// Share of records with a value for this attribute, in percent.
    pub pct: f64,
    pub n_labeled: usize,
    pub n_positive: usize,
    pub prevalence_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDistribution {
    pub attribute: String,
    pub n_missing: usize,
    pub missing_rate: f64,
    pub groups: BTreeMap<String, GroupCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptiveStats {
    pub cohort_overview: CohortOverview,
    pub attributes: BTreeMap<String, AttributeDistribution>,
}

pub fn describe_cohort(cohort: &Cohort, attributes: &[SensitiveAttributeSpec]) -> DescriptiveStats {
    let n_total = cohort.len();
    let labeled: Vec<&PatientRecord> = cohort.records.iter().filter(|r| r.is_labeled()).collect();
    let n_labeled = labeled.len();
    let n_positive = labeled.iter().filter(|r| r.y_true == Some(1.0)).count();
    let prob_sum: f64 = cohort.records.iter().map(|r| r.y_prob).sum();

    let cohort_overview = CohortOverview {
        n_total,
        n_labeled,
        n_missing_label: n_total - n_labeled,
        missing_label_rate: safe_divide((n_total - n_labeled) as f64, n_total as f64, 0.0),
        n_positive,
        prevalence_pct: 100.0 * safe_divide(n_positive as f64, n_labeled as f64, 0.0),
        mean_predicted: safe_divide(prob_sum, n_total as f64, 0.0),
    };

    let attributes = attributes
        .iter()
        .map(|spec| (spec.name.clone(), describe_attribute(cohort, &spec.name)))
        .collect();

    DescriptiveStats {
        cohort_overview,
        attributes,
    }
}

fn describe_attribute(cohort: &Cohort, name: &str) -> AttributeDistribution {
    let mut counts: BTreeMap<String, (usize, usize, usize)> = BTreeMap::new();
    let mut n_missing = 0usize;
    for r in &cohort.records {
        match r.attribute(name) {
            Some(value) => {
                let entry = counts.entry(value.to_string()).or_default();
                entry.0 += 1;
                if r.is_labeled() {
                    entry.1 += 1;
                    if r.y_true == Some(1.0) {
                        entry.2 += 1;
                    }
                }
            }
            None => n_missing += 1,
        }
    }

    let n_present = (cohort.len() - n_missing) as f64;
    let groups = counts
        .into_iter()
        .map(|(group, (n, n_labeled, n_positive))| {
            (
                group,
                GroupCount {
                    n,
                    pct: 100.0 * safe_divide(n as f64, n_present, 0.0),
                    n_labeled,
                    n_positive,
                    prevalence_pct: 100.0 * safe_divide(n_positive as f64, n_labeled as f64, 0.0),
                },
            )
        })
        .collect();

    AttributeDistribution {
        attribute: name.to_string(),
        n_missing,
        missing_rate: safe_divide(n_missing as f64, cohort.len() as f64, 0.0),
        groups,
    }
}

// ---------------------------------------------------------------------------
// Attribute suggestion
// ---------------------------------------------------------------------------

/// Name fragments of columns that usually hold protected characteristics.
const SENSITIVE_NAME_PATTERNS: &[(&str, &str)] = &[
    ("race", "race/ethnicity"),
    ("ethnic", "race/ethnicity"),
    ("sex", "sex/gender"),
    ("gender", "sex/gender"),
    ("insurance", "payer"),
    ("payer", "payer"),
    ("language", "language"),
    ("age", "age group"),
    ("disab", "disability"),
];

/// A cohort column that looks like a sensitive attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSuggestion {
    pub name: String,
    pub category: String,
    pub n_groups: usize,
    pub suggested_reference: Option<String>,
}

/// Suggest attribute columns whose names match common protected
/// characteristics, with the largest group as the suggested reference.
pub fn suggest_sensitive_attributes(cohort: &Cohort) -> Vec<AttributeSuggestion> {
    cohort
        .attribute_names()
        .into_iter()
        .filter_map(|name| {
            let lower = name.to_lowercase();
            let (_, category) = SENSITIVE_NAME_PATTERNS
                .iter()
                .find(|(pattern, _)| lower.contains(pattern))?;
            let dist = describe_attribute(cohort, &name);
            let mut suggested_reference: Option<(&String, usize)> = None;
            for (group, count) in &dist.groups {
                if suggested_reference.is_none_or(|(_, n)| count.n > n) {
                    suggested_reference = Some((group, count.n));
                }
            }
            Some(AttributeSuggestion {
                n_groups: dist.groups.len(),
                suggested_reference: suggested_reference.map(|(g, _)| g.clone()),
                category: category.to_string(),
                name,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

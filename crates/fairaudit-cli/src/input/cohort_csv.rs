//! Cohort loading from CSV: one row per patient, one column for the predicted
//! probability, one for the observed outcome, every other column a candidate
//! sensitive attribute.

use std::collections::BTreeMap;
use std::io::Read;

use fairaudit_core::cohort::{Cohort, PatientRecord};

use super::file::{resolve_path, FileKind};

/// Which CSV columns carry the prediction, outcome and case id.
#[derive(Debug, Clone)]
pub struct CsvColumns {
    pub prob: String,
    pub label: String,
    pub id: Option<String>,
}

/// Cells read as missing, for outcomes and attributes alike.
const MISSING_TOKENS: &[&str] = &["", "na", "nan", "null", "none"];

fn is_missing(cell: &str) -> bool {
    MISSING_TOKENS.contains(&cell.trim().to_ascii_lowercase().as_str())
}

pub fn parse_cohort_csv<R: Read>(
    reader: R,
    columns: &CsvColumns,
) -> Result<Cohort, Box<dyn std::error::Error>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers()?.clone();

    let find = |name: &str| -> Result<usize, Box<dyn std::error::Error>> {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| format!("CSV has no '{name}' column").into())
    };
    let prob_idx = find(&columns.prob)?;
    let label_idx = find(&columns.label)?;
    let id_idx = match &columns.id {
        Some(name) => Some(find(name)?),
        None => None,
    };

    let attribute_columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != prob_idx && *i != label_idx && Some(*i) != id_idx)
        .map(|(i, h)| (i, h.trim().to_string()))
        .collect();

    let mut records = Vec::new();
    for (row, result) in rdr.records().enumerate() {
        let line = row + 2;
        let rec = result?;
        let cell = |i: usize| rec.get(i).unwrap_or("").trim();

        let y_prob: f64 = cell(prob_idx)
            .parse()
            .map_err(|_| {
                format!(
                    "line {line}: '{}' is not a number in '{}'",
                    cell(prob_idx),
                    columns.prob
                )
            })?;
        let y_true = if is_missing(cell(label_idx)) {
            None
        } else {
            let v: f64 = cell(label_idx).parse().map_err(|_| {
                format!(
                    "line {line}: '{}' is not a number in '{}'",
                    cell(label_idx),
                    columns.label
                )
            })?;
            Some(v)
        };
        let case_id = match id_idx {
            Some(i) => cell(i).to_string(),
            None => format!("row_{}", row + 1),
        };
        let attributes: BTreeMap<String, Option<String>> = attribute_columns
            .iter()
            .map(|(i, name)| {
                let v = cell(*i);
                (name.clone(), (!is_missing(v)).then(|| v.to_string()))
            })
            .collect();

        records.push(PatientRecord {
            case_id,
            y_prob,
            y_true,
            attributes,
        });
    }

    Ok(Cohort::new(records))
}

/// Load a cohort from `.csv` or `.json` (a serialized `Cohort`).
pub fn read_cohort(
    path: &str,
    columns: &CsvColumns,
) -> Result<Cohort, Box<dyn std::error::Error>> {
    let canonical = resolve_path(path)?;
    match FileKind::from_path(&canonical) {
        FileKind::Csv => {
            let file = std::fs::File::open(&canonical)
                .map_err(|e| format!("Failed to read '{}': {}", canonical.display(), e))?;
            parse_cohort_csv(file, columns)
        }
        _ => super::file::read_structured(path),
    }
}

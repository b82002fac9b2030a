use serde_json::{Map, Value};
use tabled::{builder::Builder, Table};

/// Format output as tables using the tabled crate.
///
/// Audit results get a summary, overall metrics, fairness gaps and flags;
/// anything else is shown as field/value rows.
pub fn print_table(value: &Value) {
    match value {
        Value::Object(map) => match map.get("result") {
            Some(result) if result.get("governance_recommendation").is_some() => {
                print_audit(result);
                print_envelope_notes(map);
            }
            Some(Value::Array(arr)) => {
                print_array_table(arr);
                print_envelope_notes(map);
            }
            Some(result) => {
                print_flat_object(result);
                print_envelope_notes(map);
            }
            None => print_flat_object(value),
        },
        Value::Array(arr) => print_array_table(arr),
        _ => println!("{}", value),
    }
}

// ---------------------------------------------------------------------------
// Audit results
// ---------------------------------------------------------------------------

fn print_audit(result: &Value) {
    let rec = &result["governance_recommendation"];
    let mut summary = Builder::default();
    summary.push_record(["Field", "Value"]);
    summary.push_record(["Model", &text(&result["config"]["model_name"])]);
    summary.push_record(["Audit ID", &text(&result["audit_id"])]);
    summary.push_record(["Run", &text(&result["run_timestamp"])]);
    summary.push_record(["Status", &text(&rec["status"])]);
    summary.push_record(["Outside threshold", &text(&rec["outside_threshold_count"])]);
    summary.push_record(["Near threshold", &text(&rec["near_threshold_count"])]);
    summary.push_record(["Within threshold", &text(&rec["within_threshold_count"])]);
    println!("{}", Table::from(summary));
    println!("\n{}", text(&rec["advisory"]));

    print_overall(&result["overall_performance"]);
    print_gaps(&result["fairness_metrics"]);
    print_flags(&result["flags"]);
}

fn print_overall(perf: &Value) {
    let rows = [
        ("n", &perf["n"]),
        ("prevalence", &perf["prevalence"]),
        ("auroc", &perf["discrimination"]["auroc"]),
        ("auprc", &perf["discrimination"]["auprc"]),
        ("brier_score", &perf["calibration"]["brier_score"]),
        ("calibration_slope", &perf["calibration"]["calibration_slope"]),
        ("calibration_intercept", &perf["calibration"]["calibration_intercept"]),
        ("sensitivity", &perf["classification_at_threshold"]["sensitivity"]),
        ("specificity", &perf["classification_at_threshold"]["specificity"]),
        ("ppv", &perf["classification_at_threshold"]["ppv"]),
    ];
    let mut builder = Builder::default();
    builder.push_record(["Metric", "Value", "95% CI"]);
    for (name, val) in rows {
        let ci = &perf["confidence_intervals"][name];
        builder.push_record([name.to_string(), number(val), interval(&ci["lower"], &ci["upper"])]);
    }
    println!("\nOverall performance:\n{}", Table::from(builder));
}

fn print_gaps(fairness: &Value) {
    let Value::Object(attributes) = fairness else {
        return;
    };
    let mut builder = Builder::default();
    builder.push_record(["Attribute", "Group", "Reference", "Metric", "Value", "CI"]);
    let mut any = false;
    for entry in attributes.values() {
        for gap in entry["gaps"].as_array().into_iter().flatten() {
            any = true;
            builder.push_record([
                text(&gap["attribute"]),
                text(&gap["group"]),
                text(&gap["reference"]),
                text(&gap["metric"]),
                number(&gap["value"]),
                interval(&gap["ci_lower"], &gap["ci_upper"]),
            ]);
        }
    }
    if any {
        println!("\nFairness gaps:\n{}", Table::from(builder));
    }
}

fn print_flags(flags: &Value) {
    let Some(flags) = flags.as_array().filter(|f| !f.is_empty()) else {
        println!("\nNo flags.");
        return;
    };
    let mut builder = Builder::default();
    builder.push_record(["Severity", "Category", "Message"]);
    for flag in flags {
        builder.push_record([
            text(&flag["severity"]),
            text(&flag["category"]),
            text(&flag["message"]),
        ]);
    }
    println!("\nFlags:\n{}", Table::from(builder));
}

// ---------------------------------------------------------------------------
// Generic output
// ---------------------------------------------------------------------------

fn print_envelope_notes(envelope: &Map<String, Value>) {
    if let Some(Value::Array(warnings)) = envelope.get("warnings") {
        if !warnings.is_empty() {
            println!("\nWarnings:");
            for w in warnings {
                println!("  - {}", text(w));
            }
        }
    }
    if let Some(Value::String(meth)) = envelope.get("methodology") {
        println!("\nMethodology: {}", meth);
    }
}

fn print_flat_object(value: &Value) {
    if let Value::Object(map) = value {
        let mut builder = Builder::default();
        builder.push_record(["Field", "Value"]);
        for (key, val) in map {
            builder.push_record([key.as_str(), &text(val)]);
        }
        println!("{}", Table::from(builder));
    } else {
        println!("{}", text(value));
    }
}

fn print_array_table(arr: &[Value]) {
    let Some(Value::Object(first)) = arr.first() else {
        for item in arr {
            println!("{}", text(item));
        }
        if arr.is_empty() {
            println!("(empty)");
        }
        return;
    };

    let headers: Vec<String> = first.keys().cloned().collect();
    let mut builder = Builder::default();
    builder.push_record(&headers);
    for item in arr {
        let row: Vec<String> = headers
            .iter()
            .map(|h| item.get(h.as_str()).map(text).unwrap_or_default())
            .collect();
        builder.push_record(row);
    }
    println!("{}", Table::from(builder));
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "-".to_string(),
        Value::Array(arr) => arr.iter().map(text).collect::<Vec<_>>().join(", "),
        Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}

fn number(value: &Value) -> String {
    match value.as_f64() {
        Some(v) if value.is_f64() => format!("{:.4}", v),
        _ => text(value),
    }
}

fn interval(lower: &Value, upper: &Value) -> String {
    match (lower.as_f64(), upper.as_f64()) {
        (Some(lo), Some(hi)) => format!("[{:.4}, {:.4}]", lo, hi),
        _ => "-".to_string(),
    }
}

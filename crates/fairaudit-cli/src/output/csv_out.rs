use serde_json::Value;
use std::io;

const GAP_COLUMNS: [&str; 12] = [
    "attribute",
    "group",
    "reference",
    "metric",
    "kind",
    "value",
    "group_value",
    "reference_value",
    "n_group",
    "n_reference",
    "ci_lower",
    "ci_upper",
];

/// Write output as CSV to stdout.
///
/// Audit results become one row per fairness gap; other results are written
/// as a row per array element or as field/value pairs.
pub fn print_csv(value: &Value) {
    let stdout = io::stdout();
    let mut wtr = csv::Writer::from_writer(stdout.lock());

    let result = value.get("result").unwrap_or(value);
    if let Some(fairness) = result.get("fairness_metrics") {
        write_gap_rows(&mut wtr, fairness);
    } else {
        match result {
            Value::Object(map) => {
                let _ = wtr.write_record(["field", "value"]);
                for (key, val) in map {
                    let _ = wtr.write_record([key.as_str(), &format_csv_value(val)]);
                }
            }
            Value::Array(arr) => write_array_csv(&mut wtr, arr),
            _ => {
                let _ = wtr.write_record([&format_csv_value(result)]);
            }
        }
    }

    let _ = wtr.flush();
}

fn gap_rows(fairness: &Value) -> Vec<Vec<String>> {
    let Value::Object(attributes) = fairness else {
        return Vec::new();
    };
    attributes
        .values()
        .flat_map(|entry| entry["gaps"].as_array().cloned().unwrap_or_default())
        .map(|gap| GAP_COLUMNS.iter().map(|c| format_csv_value(&gap[*c])).collect())
        .collect()
}

fn write_gap_rows<W: io::Write>(wtr: &mut csv::Writer<W>, fairness: &Value) {
    let _ = wtr.write_record(GAP_COLUMNS);
    for row in gap_rows(fairness) {
        let _ = wtr.write_record(&row);
    }
}

fn write_array_csv<W: io::Write>(wtr: &mut csv::Writer<W>, arr: &[Value]) {
    let Some(Value::Object(first)) = arr.first() else {
        for item in arr {
            let _ = wtr.write_record([&format_csv_value(item)]);
        }
        return;
    };

    let headers: Vec<&str> = first.keys().map(|k| k.as_str()).collect();
    let _ = wtr.write_record(&headers);
    for item in arr {
        let row: Vec<String> = headers
            .iter()
            .map(|h| item.get(*h).map(format_csv_value).unwrap_or_default())
            .collect();
        let _ = wtr.write_record(&row);
    }
}

fn format_csv_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

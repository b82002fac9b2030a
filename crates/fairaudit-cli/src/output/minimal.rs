use serde_json::Value;

/// Print just the headline answer.
///
/// Audits print the governance status with its counts; other outputs fall
/// back to well-known keys, then to the first field.
pub fn print_minimal(value: &Value) {
    let result_obj = value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value);

    if let Some(rec) = result_obj.get("governance_recommendation") {
        println!("{}", format_status(rec));
        return;
    }

    let priority_keys = ["status", "auroc", "n_total"];

    if let Value::Object(map) = result_obj {
        for key in &priority_keys {
            if let Some(val) = map.get(*key) {
                if !val.is_null() {
                    println!("{}", format_minimal(val));
                    return;
                }
            }
        }

        if let Some((key, val)) = map.iter().next() {
            println!("{}: {}", key, format_minimal(val));
            return;
        }
    }

    if let Value::Array(items) = result_obj {
        // suggestion lists: one name per line
        for item in items {
            match item.get("name") {
                Some(name) => println!("{}", format_minimal(name)),
                None => println!("{}", format_minimal(item)),
            }
        }
        return;
    }

    println!("{}", format_minimal(result_obj));
}

fn format_status(rec: &Value) -> String {
    let count = |key: &str| rec.get(key).and_then(Value::as_u64).unwrap_or(0);
    format!(
        "{} (outside: {}, near: {}, within: {})",
        rec.get("status").map(format_minimal).unwrap_or_default(),
        count("outside_threshold_count"),
        count("near_threshold_count"),
        count("within_threshold_count"),
    )
}

fn format_minimal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

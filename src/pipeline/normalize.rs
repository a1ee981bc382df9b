use crate::constants::{
    COL_BROWSER, COL_ENTRY_ID, COL_IP_ADDRESS, COL_OS, COL_REFERRER, COL_SUBMISSION_DATE,
    COL_USER_ID, MULTI_VALUE_SEPARATOR,
};
use crate::observability::metrics;
use crate::types::{FieldLabelMap, NormalizedRow, RawRecord};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Turn one raw submission into a flat row.
///
/// Fixed metadata columns come first, in a fixed order, followed by one
/// column per field of the decoded payload in payload order. Nothing here
/// fails: an undecodable payload yields the fixed columns only and a
/// malformed field yields an empty cell.
pub fn normalize(raw: &RawRecord, labels: &FieldLabelMap) -> NormalizedRow {
    let mut row = NormalizedRow::new();

    row.insert(COL_ENTRY_ID, raw.id.as_str());
    row.insert(COL_SUBMISSION_DATE, raw.created_at.as_str());
    row.insert(COL_BROWSER, raw.browser.as_deref().unwrap_or_default());
    row.insert(COL_IP_ADDRESS, raw.ip.as_deref().unwrap_or_default());
    row.insert(COL_OS, raw.os.as_deref().unwrap_or_default());
    row.insert(COL_REFERRER, raw.referrer.as_deref().unwrap_or_default());
    row.insert(COL_USER_ID, raw.user_id.as_deref().unwrap_or_default());

    if let Some(fields) = decode_payload(raw) {
        for (field_key, field_info) in &fields {
            let label = labels.label_for(field_key);
            let value = field_value(raw, field_key, field_info);
            row.insert(label, value);
        }
    }

    metrics::normalize::row_produced();
    row
}

fn decode_payload(raw: &RawRecord) -> Option<Map<String, Value>> {
    if raw.form_data.trim().is_empty() {
        debug!(entry_id = %raw.id, "Entry has no field payload");
        return None;
    }

    match serde_json::from_str::<Value>(&raw.form_data) {
        Ok(Value::Object(fields)) => Some(fields),
        Ok(other) => {
            warn!(
                entry_id = %raw.id,
                form_id = %raw.form_id,
                kind = json_kind(&other),
                "Field payload is not a mapping, exporting fixed columns only"
            );
            metrics::normalize::decode_failure();
            None
        }
        Err(e) => {
            warn!(
                entry_id = %raw.id,
                form_id = %raw.form_id,
                error = %e,
                "Field payload failed to decode, exporting fixed columns only"
            );
            metrics::normalize::decode_failure();
            None
        }
    }
}

fn field_value(raw: &RawRecord, field_key: &str, field_info: &Value) -> String {
    let Value::Object(info) = field_info else {
        warn!(
            entry_id = %raw.id,
            field = field_key,
            kind = json_kind(field_info),
            "Malformed field entry, exporting an empty value"
        );
        metrics::normalize::field_degraded();
        return String::new();
    };

    match info.get("value") {
        None => String::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(scalar_text)
            .collect::<Vec<_>>()
            .join(MULTI_VALUE_SEPARATOR),
        Some(value) => scalar_text(value),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => String::new(),
        nested => nested.to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

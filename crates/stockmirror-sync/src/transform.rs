//! Record transformation
//!
//! Turns one raw source record into the flattened, sanitized parameter set
//! for a single destination write. The source payloads drift over time, so
//! nothing here assumes a fixed field set: every key is sanitized into a
//! valid column identifier, the configured id field is mapped to the
//! canonical `source_id` column, and nested structures are serialized to
//! text. A `DestinationRow` is transient; it never outlives the write it
//! parameterizes.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use crate::entities::EntityConfig;

/// Canonical destination column holding the source system's identifier
pub const SOURCE_ID_COLUMN: &str = "source_id";

/// One typed destination value
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    /// Serialized object or array
    Json(String),
    Null,
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }
}

/// Flattened, sanitized representation of one source record
#[derive(Debug, Clone)]
pub struct DestinationRow {
    /// Canonical identifier, always in string form
    pub source_id: String,
    /// Sanitized column name/value pairs, excluding `source_id`
    pub columns: Vec<(String, ColumnValue)>,
}

impl DestinationRow {
    /// Value of the configured display field, for log messages
    pub fn display_value(&self, entity: &EntityConfig) -> Option<&str> {
        let wanted = sanitize_identifier(entity.display_field);
        self.columns.iter().find_map(|(name, value)| {
            if *name == wanted {
                match value {
                    ColumnValue::Text(s) => Some(s.as_str()),
                    _ => None,
                }
            } else {
                None
            }
        })
    }
}

/// Why a record could not be transformed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("Record has no value for id field {0}")]
    MissingId(String),

    #[error("Record is not a JSON object")]
    NotAnObject,
}

/// Sanitize a source field name into a destination column identifier.
///
/// Lowercases, maps any non-alphanumeric character to `_`, collapses runs,
/// and prefixes names that would otherwise start with a digit. The result is
/// always safe to embed double-quoted in generated SQL.
pub fn sanitize_identifier(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_underscore = false;

    for ch in raw.chars() {
        let mapped = if ch.is_ascii_alphanumeric() {
            ch.to_ascii_lowercase()
        } else {
            '_'
        };
        if mapped == '_' {
            if !last_was_underscore && !out.is_empty() {
                out.push('_');
            }
            last_was_underscore = true;
        } else {
            out.push(mapped);
            last_was_underscore = false;
        }
    }

    while out.ends_with('_') {
        out.pop();
    }

    if out.is_empty() {
        out.push_str("field");
    } else if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, 'f');
        out.insert(1, '_');
    }

    out
}

/// Whether a field name refers to a cross-system identifier.
///
/// Identifier fields keep text form in the destination regardless of the
/// runtime value, so numeric and alphanumeric source ids round-trip
/// unchanged.
pub fn is_id_like(column: &str) -> bool {
    column == SOURCE_ID_COLUMN
        || column == "id"
        || column.starts_with("id")
        || column.ends_with("_id")
}

/// Parse an ISO-8601-shaped source string into a UTC timestamp.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, and bare `YYYY-MM-DD`. Returns
/// `None` for anything else so ordinary text never masquerades as a
/// timestamp.
pub fn parse_source_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let len = s.len();
    if !(10..=35).contains(&len) {
        return None;
    }
    let bytes = s.as_bytes();
    if !(bytes[..4].iter().all(u8::is_ascii_digit) && bytes[4] == b'-') {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    if len == 10 {
        if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Some(d.and_hms_opt(0, 0, 0)?.and_utc());
        }
    }
    None
}

/// Render a scalar JSON value as the canonical string form of an identifier
fn id_value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Shape one JSON field value into a typed destination value
fn shape_value(column: &str, value: &Value) -> ColumnValue {
    if is_id_like(column) {
        return match id_value_to_string(value) {
            Some(s) => ColumnValue::Text(s),
            None => ColumnValue::Null,
        };
    }

    match value {
        Value::Null => ColumnValue::Null,
        Value::Bool(b) => ColumnValue::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                ColumnValue::Integer(i)
            } else {
                ColumnValue::Float(n.as_f64().unwrap_or(0.0))
            }
        },
        Value::String(s) => match parse_source_timestamp(s) {
            Some(ts) => ColumnValue::Timestamp(ts),
            None => ColumnValue::Text(s.clone()),
        },
        Value::Array(_) | Value::Object(_) => {
            ColumnValue::Json(value.to_string())
        },
    }
}

/// Extract the canonical identifier from a raw record, in string form
pub fn extract_source_id(entity: &EntityConfig, raw: &Value) -> Option<String> {
    raw.get(entity.id_field).and_then(id_value_to_string)
}

/// Transform one raw source record into a destination row.
///
/// Records without a usable identifier are rejected; the caller decides
/// whether that skips the record or fails the run (it always skips).
pub fn transform_record(
    entity: &EntityConfig,
    raw: &Value,
) -> Result<DestinationRow, TransformError> {
    let object = raw.as_object().ok_or(TransformError::NotAnObject)?;

    let source_id = extract_source_id(entity, raw)
        .ok_or_else(|| TransformError::MissingId(entity.id_field.to_string()))?;

    let mut columns = Vec::with_capacity(object.len());
    for (key, value) in object {
        if key == entity.id_field {
            continue;
        }
        let column = sanitize_identifier(key);
        if column == SOURCE_ID_COLUMN {
            continue;
        }
        let shaped = shape_value(&column, value);
        columns.push((column, shaped));
    }

    Ok(DestinationRow { source_id, columns })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::EntityKind;
    use serde_json::json;

    fn warehouses() -> &'static EntityConfig {
        EntityKind::Warehouses.config()
    }

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("Name"), "name");
        assert_eq!(sanitize_identifier("delivery address"), "delivery_address");
        assert_eq!(sanitize_identifier("unit-price (EUR)"), "unit_price_eur");
        assert_eq!(sanitize_identifier("123abc"), "f_123abc");
        assert_eq!(sanitize_identifier("__weird__"), "weird");
        assert_eq!(sanitize_identifier("!!!"), "field");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        for raw in ["Name", "delivery address", "123abc", "idwarehouse"] {
            let once = sanitize_identifier(raw);
            assert_eq!(sanitize_identifier(&once), once);
        }
    }

    #[test]
    fn test_is_id_like() {
        assert!(is_id_like("source_id"));
        assert!(is_id_like("idwarehouse"));
        assert!(is_id_like("supplier_id"));
        assert!(!is_id_like("name"));
        assert!(!is_id_like("paid"));
        assert!(!is_id_like("width"));
    }

    #[test]
    fn test_parse_source_timestamp() {
        assert!(parse_source_timestamp("2024-03-15T10:30:00Z").is_some());
        assert!(parse_source_timestamp("2024-03-15 10:30:00").is_some());
        assert!(parse_source_timestamp("2024-03-15").is_some());
        assert!(parse_source_timestamp("Main Warehouse").is_none());
        assert!(parse_source_timestamp("15-03-2024").is_none());
        assert!(parse_source_timestamp("1234").is_none());
    }

    #[test]
    fn test_transform_maps_id_to_source_id() {
        let raw = json!({"idwarehouse": 42, "name": "Main"});
        let row = transform_record(warehouses(), &raw).unwrap();
        assert_eq!(row.source_id, "42");
        // The id field itself is not duplicated into the column list.
        assert!(row.columns.iter().all(|(name, _)| name != "idwarehouse"));
        assert_eq!(
            row.columns,
            vec![("name".to_string(), ColumnValue::Text("Main".to_string()))]
        );
    }

    #[test]
    fn test_transform_missing_id_is_rejected() {
        let raw = json!({"name": "No id here"});
        let err = transform_record(warehouses(), &raw).unwrap_err();
        assert_eq!(err, TransformError::MissingId("idwarehouse".to_string()));
    }

    #[test]
    fn test_transform_alphanumeric_id() {
        let raw = json!({"idwarehouse": "W-1", "name": "North"});
        let row = transform_record(warehouses(), &raw).unwrap();
        assert_eq!(row.source_id, "W-1");
    }

    #[test]
    fn test_transform_shapes_values() {
        let raw = json!({
            "idwarehouse": 7,
            "name": "South",
            "priority": 3,
            "fill_rate": 0.85,
            "active": true,
            "updated": "2024-06-01 08:00:00",
            "tags": ["cold", "bonded"],
            "address": {"city": "Rotterdam"},
            "notes": null
        });
        let row = transform_record(warehouses(), &raw).unwrap();
        let get = |name: &str| {
            row.columns
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
                .unwrap()
        };

        assert_eq!(get("priority"), ColumnValue::Integer(3));
        assert_eq!(get("fill_rate"), ColumnValue::Float(0.85));
        assert_eq!(get("active"), ColumnValue::Bool(true));
        assert!(matches!(get("updated"), ColumnValue::Timestamp(_)));
        assert!(matches!(get("tags"), ColumnValue::Json(_)));
        assert!(matches!(get("address"), ColumnValue::Json(_)));
        assert_eq!(get("notes"), ColumnValue::Null);
    }

    #[test]
    fn test_transform_id_like_fields_stay_text() {
        let raw = json!({"idwarehouse": 7, "idparent": 12});
        let row = transform_record(warehouses(), &raw).unwrap();
        let (_, value) = row
            .columns
            .iter()
            .find(|(n, _)| n == "idparent")
            .unwrap();
        assert_eq!(*value, ColumnValue::Text("12".to_string()));
    }

    #[test]
    fn test_extract_source_id() {
        let raw = json!({"idwarehouse": 42});
        assert_eq!(extract_source_id(warehouses(), &raw), Some("42".to_string()));
        let raw = json!({"idwarehouse": null});
        assert_eq!(extract_source_id(warehouses(), &raw), None);
        let raw = json!({"idwarehouse": ""});
        assert_eq!(extract_source_id(warehouses(), &raw), None);
    }

    #[test]
    fn test_display_value() {
        let raw = json!({"idwarehouse": 1, "name": "Main"});
        let row = transform_record(warehouses(), &raw).unwrap();
        assert_eq!(row.display_value(warehouses()), Some("Main"));
    }
}

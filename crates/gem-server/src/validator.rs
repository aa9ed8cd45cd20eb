// crates/gem-server/src/validator.rs
// Structural JSON-Schema validation for registry payloads
//
// Implements the subset the tool catalogue actually uses: type checks,
// required fields, enum membership, additionalProperties (objects are
// closed by default), format "date-time", numeric/string bounds, and array
// items. Both the Router (before enqueue) and the Worker (before dispatch)
// validate with this module.

use chrono::DateTime;
use serde_json::Value;
use std::fmt;

/// A validation failure with a machine-readable path into the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// JSON-pointer-ish path, e.g. `phone` or `items[2].amount_cents`
    pub path: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

impl ValidationError {
    fn at(path: &str, message: impl Into<String>) -> Self {
        ValidationError {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

/// Validate a payload against a schema drawn from the registry.
pub fn validate(schema: &Value, payload: &Value) -> Result<(), ValidationError> {
    validate_at(schema, payload, "")
}

fn join_path(base: &str, key: &str) -> String {
    if base.is_empty() {
        key.to_string()
    } else {
        format!("{base}.{key}")
    }
}

fn validate_at(schema: &Value, payload: &Value, path: &str) -> Result<(), ValidationError> {
    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(payload) {
            let names: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
            return Err(ValidationError::at(
                path,
                format!("must be one of {}", names.join(", ")),
            ));
        }
        return Ok(());
    }

    let Some(expected) = schema.get("type").and_then(Value::as_str) else {
        // No type constraint: anything goes
        return Ok(());
    };

    match expected {
        "object" => validate_object(schema, payload, path),
        "array" => validate_array(schema, payload, path),
        "string" => validate_string(schema, payload, path),
        "number" => validate_number(schema, payload, path, false),
        "integer" => validate_number(schema, payload, path, true),
        "boolean" => match payload {
            Value::Bool(_) => Ok(()),
            _ => Err(ValidationError::at(path, "expected boolean")),
        },
        "null" => match payload {
            Value::Null => Ok(()),
            _ => Err(ValidationError::at(path, "expected null")),
        },
        other => Err(ValidationError::at(
            path,
            format!("schema declares unknown type {other:?}"),
        )),
    }
}

fn validate_object(schema: &Value, payload: &Value, path: &str) -> Result<(), ValidationError> {
    let Some(obj) = payload.as_object() else {
        return Err(ValidationError::at(path, "expected object"));
    };

    let empty = serde_json::Map::new();
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(field) {
                return Err(ValidationError::at(
                    &join_path(path, field),
                    "required field is missing",
                ));
            }
        }
    }

    // Objects are closed unless the schema opts out
    let additional = schema
        .get("additionalProperties")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !additional {
        for key in obj.keys() {
            if !properties.contains_key(key) {
                return Err(ValidationError::at(
                    &join_path(path, key),
                    "unexpected field",
                ));
            }
        }
    }

    for (key, prop_schema) in properties {
        if let Some(value) = obj.get(key) {
            validate_at(prop_schema, value, &join_path(path, key))?;
        }
    }

    Ok(())
}

fn validate_array(schema: &Value, payload: &Value, path: &str) -> Result<(), ValidationError> {
    let Some(items) = payload.as_array() else {
        return Err(ValidationError::at(path, "expected array"));
    };
    if let Some(item_schema) = schema.get("items") {
        for (i, item) in items.iter().enumerate() {
            validate_at(item_schema, item, &format!("{path}[{i}]"))?;
        }
    }
    Ok(())
}

fn validate_string(schema: &Value, payload: &Value, path: &str) -> Result<(), ValidationError> {
    let Some(s) = payload.as_str() else {
        return Err(ValidationError::at(path, "expected string"));
    };

    if let Some(min) = schema.get("minLength").and_then(Value::as_u64)
        && (s.chars().count() as u64) < min
    {
        return Err(ValidationError::at(
            path,
            format!("shorter than minLength {min}"),
        ));
    }
    if let Some(max) = schema.get("maxLength").and_then(Value::as_u64)
        && (s.chars().count() as u64) > max
    {
        return Err(ValidationError::at(
            path,
            format!("longer than maxLength {max}"),
        ));
    }

    if let Some(format) = schema.get("format").and_then(Value::as_str)
        && format == "date-time"
        && DateTime::parse_from_rfc3339(s).is_err()
    {
        return Err(ValidationError::at(
            path,
            "expected ISO-8601 date-time (e.g. 2026-08-01T09:00:00Z)",
        ));
    }

    Ok(())
}

fn validate_number(
    schema: &Value,
    payload: &Value,
    path: &str,
    integer: bool,
) -> Result<(), ValidationError> {
    let Some(n) = payload.as_f64() else {
        return Err(ValidationError::at(
            path,
            if integer {
                "expected integer"
            } else {
                "expected number"
            },
        ));
    };
    if integer && payload.as_i64().is_none() && payload.as_u64().is_none() {
        return Err(ValidationError::at(path, "expected integer"));
    }

    if let Some(min) = schema.get("minimum").and_then(Value::as_f64)
        && n < min
    {
        return Err(ValidationError::at(path, format!("below minimum {min}")));
    }
    if let Some(max) = schema.get("maximum").and_then(Value::as_f64)
        && n > max
    {
        return Err(ValidationError::at(path, format!("above maximum {max}")));
    }

    Ok(())
}

/// Structural sanity check for a schema document itself.
///
/// The registry loader runs this at startup so a malformed catalogue fails
/// fast instead of misvalidating payloads at runtime.
pub fn check_schema(schema: &Value) -> Result<(), ValidationError> {
    check_schema_at(schema, "")
}

const KNOWN_TYPES: [&str; 7] = [
    "object", "array", "string", "number", "integer", "boolean", "null",
];

fn check_schema_at(schema: &Value, path: &str) -> Result<(), ValidationError> {
    if !schema.is_object() {
        return Err(ValidationError::at(path, "schema must be an object"));
    }

    if let Some(ty) = schema.get("type") {
        let Some(name) = ty.as_str() else {
            return Err(ValidationError::at(path, "\"type\" must be a string"));
        };
        if !KNOWN_TYPES.contains(&name) {
            return Err(ValidationError::at(path, format!("unknown type {name:?}")));
        }
    }

    if let Some(required) = schema.get("required") {
        let Some(fields) = required.as_array() else {
            return Err(ValidationError::at(path, "\"required\" must be an array"));
        };
        if !fields.iter().all(Value::is_string) {
            return Err(ValidationError::at(
                path,
                "\"required\" entries must be strings",
            ));
        }
        // Required fields must be declared properties
        let empty = serde_json::Map::new();
        let properties = schema
            .get("properties")
            .and_then(Value::as_object)
            .unwrap_or(&empty);
        for field in fields.iter().filter_map(Value::as_str) {
            if !properties.contains_key(field) {
                return Err(ValidationError::at(
                    path,
                    format!("required field {field:?} has no property definition"),
                ));
            }
        }
    }

    if let Some(properties) = schema.get("properties") {
        let Some(props) = properties.as_object() else {
            return Err(ValidationError::at(path, "\"properties\" must be an object"));
        };
        for (key, prop_schema) in props {
            check_schema_at(prop_schema, &join_path(path, key))?;
        }
    }

    if let Some(items) = schema.get("items") {
        check_schema_at(items, &format!("{path}[]"))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lead_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "minLength": 1},
                "phone": {"type": "string", "minLength": 6},
                "suburb": {"type": "string"},
                "source": {"type": "string"},
                "notes": {"type": "string"}
            },
            "required": ["name", "phone", "suburb", "source"]
        })
    }

    #[test]
    fn test_valid_payload() {
        let payload = json!({
            "name": "John",
            "phone": "0412345678",
            "suburb": "Clayton",
            "source": "test"
        });
        assert!(validate(&lead_schema(), &payload).is_ok());
    }

    #[test]
    fn test_missing_required_names_field() {
        let payload = json!({"name": "x"});
        let err = validate(&lead_schema(), &payload).unwrap_err();
        assert_eq!(err.path, "phone");
        assert!(err.message.contains("required"));
    }

    #[test]
    fn test_unexpected_field_rejected_by_default() {
        let mut payload = json!({
            "name": "John",
            "phone": "0412345678",
            "suburb": "Clayton",
            "source": "test"
        });
        payload["extra"] = json!(true);
        let err = validate(&lead_schema(), &payload).unwrap_err();
        assert_eq!(err.path, "extra");
    }

    #[test]
    fn test_additional_properties_opt_out() {
        let schema = json!({"type": "object", "additionalProperties": true});
        assert!(validate(&schema, &json!({"anything": 1})).is_ok());
    }

    #[test]
    fn test_type_mismatch() {
        let schema = json!({"type": "object", "properties": {"n": {"type": "integer"}}});
        let err = validate(&schema, &json!({"n": "five"})).unwrap_err();
        assert_eq!(err.path, "n");
        assert!(err.message.contains("integer"));

        // Floats are not integers
        assert!(validate(&schema, &json!({"n": 1.5})).is_err());
        assert!(validate(&schema, &json!({"n": 5})).is_ok());
    }

    #[test]
    fn test_enum_membership() {
        let schema = json!({
            "type": "object",
            "properties": {"stage": {"type": "string", "enum": ["new", "quoted", "won", "lost"]}}
        });
        assert!(validate(&schema, &json!({"stage": "quoted"})).is_ok());
        let err = validate(&schema, &json!({"stage": "maybe"})).unwrap_err();
        assert_eq!(err.path, "stage");
    }

    #[test]
    fn test_date_time_format() {
        let schema = json!({
            "type": "object",
            "properties": {"at": {"type": "string", "format": "date-time"}}
        });
        assert!(validate(&schema, &json!({"at": "2026-08-01T09:00:00Z"})).is_ok());
        assert!(validate(&schema, &json!({"at": "2026-08-01T09:00:00+10:00"})).is_ok());
        assert!(validate(&schema, &json!({"at": "tomorrow morning"})).is_err());
    }

    #[test]
    fn test_numeric_bounds() {
        let schema = json!({
            "type": "object",
            "properties": {"amount_cents": {"type": "integer", "minimum": 1}}
        });
        assert!(validate(&schema, &json!({"amount_cents": 0})).is_err());
        assert!(validate(&schema, &json!({"amount_cents": 100})).is_ok());
    }

    #[test]
    fn test_nested_array_path() {
        let schema = json!({
            "type": "object",
            "properties": {
                "items": {"type": "array", "items": {"type": "string"}}
            }
        });
        let err = validate(&schema, &json!({"items": ["a", 3]})).unwrap_err();
        assert_eq!(err.path, "items[1]");
    }

    // ============================================================================
    // Schema sanity checks
    // ============================================================================

    #[test]
    fn test_check_schema_accepts_catalogue_shapes() {
        assert!(check_schema(&lead_schema()).is_ok());
    }

    #[test]
    fn test_check_schema_rejects_unknown_type() {
        let schema = json!({"type": "objekt"});
        assert!(check_schema(&schema).is_err());
    }

    #[test]
    fn test_check_schema_rejects_undeclared_required() {
        let schema = json!({
            "type": "object",
            "properties": {"a": {"type": "string"}},
            "required": ["a", "b"]
        });
        let err = check_schema(&schema).unwrap_err();
        assert!(err.message.contains("\"b\""));
    }
}

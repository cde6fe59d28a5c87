//! JSON helpers for response payloads

use crate::config::ErrorHandling;
use serde_json::{Map, Value};

/// Parse a JSON document, tolerating garbage under [`ErrorHandling::Log`].
///
/// Under `Log` an unparsable document yields an empty object and a warning.
/// Under `Fail` the parse error is returned.
pub fn safe_json_loads(text: &str, policy: ErrorHandling) -> Result<Value, serde_json::Error> {
    match serde_json::from_str(text) {
        Ok(value) => Ok(value),
        Err(e) => match policy {
            ErrorHandling::Fail => Err(e),
            ErrorHandling::Log => {
                tracing::warn!(error = %e, len = text.len(), "Invalid JSON, substituting empty object");
                Ok(Value::Object(Map::new()))
            }
        },
    }
}

/// Render a response for an output cell.
///
/// Strings are kept verbatim, everything else is compact JSON, `null` is empty.
pub fn to_cell_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_safe_json_loads_valid() {
        let value = safe_json_loads(r#"{"label": "pos"}"#, ErrorHandling::Fail).unwrap();
        assert_eq!(value, json!({"label": "pos"}));
    }

    #[test]
    fn test_safe_json_loads_invalid_under_log() {
        let value = safe_json_loads("{not json", ErrorHandling::Log).unwrap();
        assert_eq!(value, json!({}));
    }

    #[test]
    fn test_safe_json_loads_invalid_under_fail() {
        assert!(safe_json_loads("{not json", ErrorHandling::Fail).is_err());
    }

    #[test]
    fn test_to_cell_string() {
        assert_eq!(to_cell_string(&json!("plain")), "plain");
        assert_eq!(to_cell_string(&json!({"a": [1, 2]})), r#"{"a":[1,2]}"#);
        assert_eq!(to_cell_string(&json!(3.5)), "3.5");
        assert_eq!(to_cell_string(&Value::Null), "");
    }
}

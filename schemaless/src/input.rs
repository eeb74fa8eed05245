//! Source document parsing. Sources arrive as JSON or YAML.

use crate::errors::{Result, SchemalessError};
use serde_json::Value;

/// Parse a source document into a JSON tree.
///
/// Input that is not JSON is read as YAML. The document must be an object or
/// a list.
pub fn parse_input(raw: &[u8]) -> Result<Value> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| SchemalessError::malformed_with_source("input is not valid UTF-8", e))?
        .trim();
    if text.is_empty() {
        return Err(SchemalessError::malformed("input is empty"));
    }

    let value = match serde_json::from_str::<Value>(text) {
        Ok(value) => value,
        Err(json_err) => {
            tracing::debug!(error = %json_err, "input is not JSON, trying YAML");
            serde_yaml::from_str::<Value>(text)
                .map_err(|e| SchemalessError::malformed_with_source("input is neither JSON nor YAML", e))?
        }
    };

    match value {
        Value::Object(_) | Value::Array(_) => Ok(value),
        other => Err(SchemalessError::malformed(format!(
            "input must be an object or a list, found {}",
            crate::path::type_name(&other)
        ))),
    }
}

//! Shape fingerprinting.
//!
//! Two documents that differ only in their values (or in digit-suffixed
//! custom-field keys such as `custom_field_12`) reduce to the same skeleton
//! and therefore share a learned template.

use serde_json::Map;
use serde_json::Value;
use sha2::Digest;
use sha2::Sha256;
use std::fmt;

/// Stable token derived from a [`skeleton`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShapeToken(String);

impl ShapeToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShapeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Replace every scalar with its type's zero value, drop digit-suffixed keys
/// and collapse repeated list items.
pub fn skeleton(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) => Value::Bool(false),
        Value::Number(_) => Value::from(0),
        Value::String(_) => Value::String(String::new()),
        Value::Array(items) => {
            let mut reduced: Vec<Value> = Vec::new();
            for item in items {
                let item = skeleton(item);
                if !reduced.contains(&item) {
                    reduced.push(item);
                }
            }
            Value::Array(reduced)
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !ends_with_digit(key))
                .map(|(key, child)| (key.clone(), skeleton(child)))
                .collect(),
        ),
    }
}

fn ends_with_digit(key: &str) -> bool {
    key.bytes().last().is_some_and(|b| b.is_ascii_digit())
}

/// Copy of `value` with object keys sorted at every depth.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                if let Some(child) = map.get(key) {
                    sorted.insert(key.clone(), canonicalize(child));
                }
            }
            Value::Object(sorted)
        }
        scalar => scalar.clone(),
    }
}

/// SHA-256 hex digest of `input`.
pub fn compute_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Token of the canonicalised skeleton of `value`.
pub fn shape_token(value: &Value) -> ShapeToken {
    let canonical = canonicalize(&skeleton(value));
    ShapeToken(compute_hash(&canonical.to_string()))
}

/// Cache and store key of a learned template:
/// `{reference_prefix}{standard}-{token}`, with any `.json` suffix trimmed
/// from the standard name.
pub fn template_key(reference_prefix: &str, standard: &str, token: &ShapeToken) -> String {
    let standard = standard.trim_end_matches(".json");
    format!("{reference_prefix}{standard}-{token}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn zeroes_every_scalar() {
        let source = json!({
            "name": "alice",
            "age": 42,
            "ratio": 0.5,
            "active": true,
            "deleted": null,
            "meta": {"tags": ["a", "b"], "owner": {"id": 7}}
        });

        assert_eq!(
            skeleton(&source),
            json!({
                "name": "",
                "age": 0,
                "ratio": 0,
                "active": false,
                "deleted": null,
                "meta": {"tags": [""], "owner": {"id": 0}}
            })
        );
    }

    #[test]
    fn drops_digit_suffixed_keys_at_every_depth() {
        let source = json!({
            "title": "x",
            "custom_field_1": "a",
            "nested": {"field10": 1, "keep": 2},
            "rows": [{"col3": true, "id": 1}]
        });

        assert_eq!(
            skeleton(&source),
            json!({"title": "", "nested": {"keep": 0}, "rows": [{"id": 0}]})
        );
    }

    #[test]
    fn token_ignores_values_key_order_and_list_length() {
        let a = json!({"id": 1, "items": [{"v": "x"}], "custom9": "q"});
        let b = json!({"items": [{"v": "y"}, {"v": "z"}], "id": 99});
        assert_eq!(shape_token(&a), shape_token(&b));
    }

    #[test]
    fn token_changes_with_structure() {
        let a = json!({"id": 1});
        let b = json!({"id": "1"});
        let c = json!({"ident": 1});
        assert_ne!(shape_token(&a), shape_token(&b));
        assert_ne!(shape_token(&a), shape_token(&c));
    }

    #[test]
    fn token_is_hex_sha256() {
        let token = shape_token(&json!({}));
        assert_eq!(token.as_str().len(), 64);
        assert_eq!(token.as_str(), compute_hash("{}"));
    }

    #[test]
    fn template_key_trims_json_suffix() {
        let token = ShapeToken("abc".to_string());
        assert_eq!(template_key("org_", "users.json", &token), "org_users-abc");
        assert_eq!(template_key("", "tickets", &token), "tickets-abc");
    }
}

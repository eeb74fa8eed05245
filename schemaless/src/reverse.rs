//! Reverse inference: discover the template that turns a source document into
//! a known-good output, and write values back into a tree at a path.

use crate::apply::{TargetSpec, Template};
use crate::errors::{Result, SchemalessError};
use crate::path::{ListSelector, PathExpr, Segment, type_name};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Find, for every key of `targets`, the path in `source` holding the same
/// value. Keys whose value is not found map to `""`.
///
/// Object keys are visited in lexical order and the first match wins, so the
/// result does not depend on the source's key order.
pub fn infer_paths(source: &Value, targets: &Map<String, Value>) -> BTreeMap<String, String> {
    let mut found: BTreeMap<String, String> =
        targets.keys().map(|key| (key.clone(), String::new())).collect();
    let mut walker = Walker {
        targets,
        found: &mut found,
        remaining: targets.values().filter(|v| is_matchable(v)).count(),
    };
    walker.walk(source, "");
    found
}

fn is_matchable(value: &Value) -> bool {
    match value {
        Value::Null | Value::Array(_) | Value::Object(_) => false,
        Value::String(s) => !s.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

struct Walker<'a> {
    targets: &'a Map<String, Value>,
    found: &'a mut BTreeMap<String, String>,
    remaining: usize,
}

impl Walker<'_> {
    fn walk(&mut self, node: &Value, prefix: &str) {
        if self.remaining == 0 {
            return;
        }
        if let Some(decoded) = embedded_object(node) {
            self.walk(&decoded, prefix);
            return;
        }

        match node {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                for key in keys {
                    if !is_addressable(key) {
                        tracing::debug!(key = %key, "skipping key a path cannot name");
                        continue;
                    }
                    if let Some(child) = map.get(key) {
                        self.walk(child, &join(prefix, key));
                    }
                }
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.walk(item, &join(prefix, &format!("#{i}")));
                }
            }
            leaf if !prefix.is_empty() && is_matchable(leaf) => self.record(leaf, prefix),
            _ => {}
        }
    }

    fn record(&mut self, leaf: &Value, path: &str) {
        for (key, target) in self.targets {
            if target != leaf {
                continue;
            }
            if let Some(slot) = self.found.get_mut(key)
                && slot.is_empty()
            {
                *slot = path.to_string();
                self.remaining = self.remaining.saturating_sub(1);
            }
        }
    }
}

/// Whether `key` survives as a single segment of a parsed path.
fn is_addressable(key: &str) -> bool {
    !key.is_empty()
        && key.trim() == key
        && !key.contains(['.', '"', '$'])
        && !key.contains("[]")
        && ListSelector::parse(key).is_none()
}

fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}

/// A string that holds a serialized JSON object, e.g. an HTTP body.
fn embedded_object(node: &Value) -> Option<Value> {
    let text = node.as_str()?.trim();
    if !(text.starts_with('{') && text.ends_with('}') && text.contains('"')) {
        return None;
    }
    match serde_json::from_str::<Value>(text) {
        Ok(decoded @ Value::Object(_)) => Some(decoded),
        Ok(_) => None,
        Err(err) => {
            tracing::debug!(error = %err, "string looked like JSON but did not parse");
            None
        }
    }
}

/// Template inferred from a sample output.
#[derive(Debug, Clone, PartialEq)]
pub struct InferredTemplate {
    pub template: Template,
    /// Every non-empty sample value was located in the source.
    pub complete: bool,
    /// Sample keys with a value that could not be located.
    pub unmatched: Vec<String>,
}

/// Build a template that maps `source` onto `sample`.
///
/// Located keys become paths. Keys with an empty or null sample value are
/// kept as literals; keys whose value was not found are left out and listed
/// in `unmatched`.
pub fn infer_template(source: &Value, sample: &Value) -> Result<InferredTemplate> {
    let Value::Object(targets) = sample else {
        return Err(SchemalessError::malformed(format!(
            "sample output must be a JSON object, found {}",
            type_name(sample)
        )));
    };

    let paths = infer_paths(source, targets);
    let mut unmatched = Vec::new();
    let mut entries = Vec::new();
    for (key, value) in targets {
        match paths.get(key).filter(|path| !path.is_empty()) {
            Some(path) => entries.push((key.clone(), TargetSpec::Text(path.clone()))),
            None if is_matchable(value) => unmatched.push(key.clone()),
            None => entries.push((key.clone(), TargetSpec::from_value(value))),
        }
    }

    Ok(InferredTemplate {
        template: entries.into_iter().collect(),
        complete: unmatched.is_empty(),
        unmatched,
    })
}

/// Write `value` into `tree` at `path`.
///
/// Missing intermediate objects are created. A list reached through a key
/// with no selector after it has every item updated. When both the existing
/// node and `value` are objects they are deep-merged.
pub fn place_value(tree: &mut Value, path: &str, value: Value) -> Result<()> {
    let expr = PathExpr::parse(path);
    if expr.is_empty() {
        merge(tree, value);
        return Ok(());
    }
    Placer { expr: &expr }.place(tree, 0, &value)
}

struct Placer<'a> {
    expr: &'a PathExpr,
}

impl Placer<'_> {
    fn place(&self, node: &mut Value, idx: usize, value: &Value) -> Result<()> {
        let segments = self.expr.segments();
        let Some(segment) = segments.get(idx) else {
            merge(node, value.clone());
            return Ok(());
        };

        match segment {
            Segment::Key(key) => {
                if node.is_null() {
                    *node = Value::Object(Map::new());
                }
                let Value::Object(map) = node else {
                    return Err(SchemalessError::type_mismatch(
                        self.prefix(idx),
                        "object",
                        type_name(node),
                    ));
                };
                if let Some(Segment::List(selector)) = segments.get(idx + 1)
                    && !map.contains_key(key)
                {
                    return Err(SchemalessError::path_not_found(
                        self.prefix(idx + 2),
                        selector.to_string(),
                    ));
                }
                let child = map.entry(key.clone()).or_insert(Value::Null);

                let next_is_key = matches!(segments.get(idx + 1), Some(Segment::Key(_)));
                if next_is_key && let Value::Array(items) = child {
                    for item in items.iter_mut() {
                        self.place(item, idx + 1, value)?;
                    }
                    return Ok(());
                }
                self.place(child, idx + 1, value)
            }
            Segment::List(selector) => self.place_in_list(node, idx, *selector, value),
        }
    }

    fn place_in_list(
        &self,
        node: &mut Value,
        idx: usize,
        selector: ListSelector,
        value: &Value,
    ) -> Result<()> {
        let Value::Array(items) = node else {
            if node.is_null() {
                return Err(SchemalessError::path_not_found(
                    self.prefix(idx + 1),
                    selector.to_string(),
                ));
            }
            return Err(SchemalessError::type_mismatch(
                self.prefix(idx),
                "array",
                type_name(node),
            ));
        };
        let Some(range) = selector.indices(items.len()) else {
            return Err(SchemalessError::path_not_found(
                self.prefix(idx + 1),
                selector.to_string(),
            ));
        };
        for item in &mut items[range] {
            self.place(item, idx + 1, value)?;
        }
        Ok(())
    }

    fn prefix(&self, len: usize) -> String {
        PathExpr::from_segments(self.expr.segments()[..len].to_vec()).to_string()
    }
}

fn merge(target: &mut Value, value: Value) {
    match (target, value) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, incoming_child) in incoming {
                match existing.get_mut(&key) {
                    Some(existing_child) => merge(existing_child, incoming_child),
                    None => {
                        existing.insert(key, incoming_child);
                    }
                }
            }
        }
        (target, value) => *target = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::{ApplyOptions, TemplateApplier};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn targets(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn nested_source() -> Value {
        json!({
            "findme": "This is the value to find",
            "subkey": {
                "findAnother": "This is another value to find",
                "subsubkey": {"findAnother2": "Amazing subsubkey to find"},
                "sublist": ["This is a list", "This is a list", "Cool list item", "This is a list"],
                "objectlist": [{"key1": "This is a key"}, {"key1": "Another cool thing"}]
            }
        })
    }

    #[test]
    fn finds_top_level_key() {
        let paths = infer_paths(
            &json!({"findme": "This is the value to find"}),
            &targets(json!({"key1": "This is the value to find"})),
        );
        assert_eq!(paths, BTreeMap::from([("key1".to_string(), "findme".to_string())]));
    }

    #[test]
    fn finds_nested_and_list_paths() {
        let paths = infer_paths(
            &nested_source(),
            &targets(json!({
                "key1": "This is the value to find",
                "key2": "This is another value to find",
                "key3": "Amazing subsubkey to find",
                "key4": "Cool list item",
                "key5": "Another cool thing",
                "key6": "Not anywhere"
            })),
        );

        assert_eq!(
            paths,
            BTreeMap::from([
                ("key1".to_string(), "findme".to_string()),
                ("key2".to_string(), "subkey.findAnother".to_string()),
                ("key3".to_string(), "subkey.subsubkey.findAnother2".to_string()),
                ("key4".to_string(), "subkey.sublist.#2".to_string()),
                ("key5".to_string(), "subkey.objectlist.#1.key1".to_string()),
                ("key6".to_string(), String::new()),
            ])
        );
    }

    #[test]
    fn first_match_in_sorted_order_wins() {
        // "b" is inserted first but "a" sorts first.
        let source = json!({"b": "same", "a": "same"});
        let paths = infer_paths(&source, &targets(json!({"k": "same"})));
        assert_eq!(paths["k"], "a");
    }

    #[test]
    fn several_keys_can_share_a_value() {
        let paths = infer_paths(&json!({"v": 7}), &targets(json!({"x": 7, "y": 7})));
        assert_eq!(paths["x"], "v");
        assert_eq!(paths["y"], "v");
    }

    #[test]
    fn empty_and_null_values_never_match() {
        let source = json!({"a": "", "b": null});
        let paths = infer_paths(&source, &targets(json!({"x": "", "y": null})));
        assert_eq!(paths["x"], "");
        assert_eq!(paths["y"], "");
    }

    #[test]
    fn walks_embedded_json_strings() {
        let source = json!({
            "body": "{\n  \"fields\": {\n    \"project\": {\n      \"key\": \"SHUF\"\n    },\n    \"summary\": \"heyo\"\n  }\n}\n",
            "url": "https://example.atlassian.net"
        });

        let paths = infer_paths(&source, &targets(json!({"proj": "SHUF", "title": "heyo"})));
        assert_eq!(paths["proj"], "body.fields.project.key");
        assert_eq!(paths["title"], "body.fields.summary");
    }

    #[test]
    fn nested_lists_get_double_index() {
        let source = json!({"grid": [[1, 2], [3, 4]]});
        let paths = infer_paths(&source, &targets(json!({"cell": 3})));
        assert_eq!(paths["cell"], "grid.#1.#0");
    }

    #[test]
    fn inferred_template_round_trips() {
        let source = nested_source();
        let sample = json!({
            "key1": "This is the value to find",
            "key4": "Cool list item",
            "key5": "Another cool thing",
            "blank": ""
        });

        let inferred = infer_template(&source, &sample).expect("object sample");
        assert!(inferred.complete);

        let output = TemplateApplier::new(ApplyOptions::default()).apply(&source, &inferred.template);
        assert_eq!(output, sample);
    }

    #[test]
    fn round_trip_through_embedded_json() {
        let source = json!({"body": "{\"fields\": {\"summary\": \"heyo\"}}"});
        let sample = json!({"title": "heyo"});

        let inferred = infer_template(&source, &sample).expect("object sample");
        let output = TemplateApplier::default().apply(&source, &inferred.template);
        assert_eq!(output, sample);
    }

    #[test]
    fn list_root_round_trips() {
        let source = json!(["x", "y", {"name": "z"}]);
        let sample = json!({"second": "y", "name": "z"});

        let inferred = infer_template(&source, &sample).expect("object sample");
        assert!(inferred.complete);
        assert_eq!(inferred.template.to_value(), json!({"second": "#1", "name": "#2.name"}));

        let output = TemplateApplier::default().apply(&source, &inferred.template);
        assert_eq!(output, sample);
    }

    #[test]
    fn keys_a_path_cannot_name_stay_unmatched() {
        let source = json!({
            "labels": {"app.kubernetes.io/name": "web"},
            "odd": {"#1": "one", "$ref": "two", "a[]": "three", "\"q\"": "four", " pad": "five"},
            "plain": {"team": "ops"}
        });
        let sample = json!({
            "app": "web",
            "a": "one",
            "b": "two",
            "c": "three",
            "d": "four",
            "e": "five",
            "team": "ops"
        });

        let inferred = infer_template(&source, &sample).expect("object sample");
        assert!(!inferred.complete);
        assert_eq!(
            inferred.unmatched,
            vec!["app", "a", "b", "c", "d", "e"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );
        assert_eq!(inferred.template.to_value(), json!({"team": "plain.team"}));
    }

    #[test]
    fn inferred_template_reports_unmatched() {
        let inferred = infer_template(&json!({"a": 1}), &json!({"x": 1, "y": "nowhere"}))
            .expect("object sample");
        assert!(!inferred.complete);
        assert_eq!(inferred.unmatched, vec!["y".to_string()]);
        assert_eq!(inferred.template.to_value(), json!({"x": "a"}));
    }

    #[test]
    fn places_values_in_nested_objects() {
        let mut body = json!({
            "fields": {"project": {"key": ""}, "summary": "", "issuetype": {"name": "Bug"}}
        });

        place_value(&mut body, "fields.summary", json!("heyo")).expect("summary");
        place_value(&mut body, "fields.project.key", json!("SHUF")).expect("key");

        assert_eq!(
            body,
            json!({"fields": {"project": {"key": "SHUF"}, "summary": "heyo", "issuetype": {"name": "Bug"}}})
        );
    }

    #[test]
    fn creates_missing_intermediate_objects() {
        let mut tree = json!({});
        place_value(&mut tree, "a.b.c", json!(1)).expect("created");
        assert_eq!(tree, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn list_selectors_pick_items() {
        let base = json!({"items": [{"v": 0}, {"v": 0}, {"v": 0}]});

        let mut all = base.clone();
        place_value(&mut all, "items.#.v", json!(1)).expect("all");
        assert_eq!(all, json!({"items": [{"v": 1}, {"v": 1}, {"v": 1}]}));

        let mut one = base.clone();
        place_value(&mut one, "items.#1.v", json!(1)).expect("one");
        assert_eq!(one, json!({"items": [{"v": 0}, {"v": 1}, {"v": 0}]}));

        let mut range = base.clone();
        place_value(&mut range, "items.#1-max.v", json!(1)).expect("range");
        assert_eq!(range, json!({"items": [{"v": 0}, {"v": 1}, {"v": 1}]}));

        let mut bare = base;
        place_value(&mut bare, "items.v", json!(2)).expect("bare list");
        assert_eq!(bare, json!({"items": [{"v": 2}, {"v": 2}, {"v": 2}]}));
    }

    #[test]
    fn deep_merges_objects() {
        let mut tree = json!({"meta": {"a": 1, "nested": {"x": 1}}});
        place_value(&mut tree, "meta", json!({"b": 2, "nested": {"y": 2}})).expect("merge");
        assert_eq!(tree, json!({"meta": {"a": 1, "b": 2, "nested": {"x": 1, "y": 2}}}));
    }

    #[test]
    fn reports_bad_paths() {
        let mut tree = json!({"items": [1, 2], "name": "x"});

        let err = place_value(&mut tree, "items.#5", json!(0)).expect_err("out of range");
        assert_eq!(err.category().as_str(), "PATH_NOT_FOUND");

        let err = place_value(&mut tree, "name.first", json!(0)).expect_err("string is not an object");
        assert_eq!(err.to_string(), "type mismatch at 'name': expected object, found string");

        let err = place_value(&mut tree, "name.#", json!(0)).expect_err("string is not a list");
        assert_eq!(err.category().as_str(), "TYPE_MISMATCH");
    }
}

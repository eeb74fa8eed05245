//! Forward application of a translation template.
//!
//! A template maps output field names to target specs: literals, path
//! expressions (bare or `$`-interpolated), nested templates and sequences.
//! Paths that pass through an unpinned list selector produce a
//! [`Shaped::Deferred`] list. Inside a sequence, all deferred fields of one
//! element are zipped into one output entry per source item. Elsewhere they
//! are materialised as plain arrays.
//!
//! Field-level failures never abort the run: the offending field keeps its
//! template value (or the empty string, for interpolated references) and the
//! error is logged.

use crate::errors::{Result, SchemalessError};
use crate::path::{PathExpr, Resolved, Segment, find_references};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Key under which the untouched source is placed when `keep_original` is set.
pub const UNMAPPED_KEY: &str = "unmapped";

/// How fields indexing into lists of different lengths are zipped together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListAlignment {
    /// Short fields reuse their first item for the missing positions.
    #[default]
    PadWithFirst,
    /// Any length difference fails the sequence element.
    Strict,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    pub list_alignment: ListAlignment,
    pub keep_original: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Template model
// ─────────────────────────────────────────────────────────────────────────────

/// A parsed translation template: output field name to target spec, in
/// template order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Template {
    entries: Vec<(String, TargetSpec)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TargetSpec {
    /// Non-string scalar, copied through.
    Literal(Value),
    /// Literal text, a bare path, or text with `$path` references.
    Text(String),
    Nested(Template),
    Sequence(Vec<TargetSpec>),
}

impl Template {
    /// Build from a JSON object. Anything else is malformed.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self::from_map(map)),
            other => Err(SchemalessError::malformed(format!(
                "template must be a JSON object, found {}",
                crate::path::type_name(other)
            ))),
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| SchemalessError::malformed_with_source("template is not valid JSON", e))?;
        Self::from_value(&value)
    }

    fn from_map(map: &Map<String, Value>) -> Self {
        Self {
            entries: map
                .iter()
                .map(|(key, value)| (key.clone(), TargetSpec::from_value(value)))
                .collect(),
        }
    }

    pub fn entries(&self) -> &[(String, TargetSpec)] {
        &self.entries
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(key, spec)| (key.clone(), spec.to_value()))
                .collect(),
        )
    }
}

impl<K: Into<String>> FromIterator<(K, TargetSpec)> for Template {
    fn from_iter<I: IntoIterator<Item = (K, TargetSpec)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, spec)| (k.into(), spec)).collect(),
        }
    }
}

impl TargetSpec {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(text) => TargetSpec::Text(text.clone()),
            Value::Object(map) => TargetSpec::Nested(Template::from_map(map)),
            Value::Array(items) => {
                TargetSpec::Sequence(items.iter().map(TargetSpec::from_value).collect())
            }
            scalar => TargetSpec::Literal(scalar.clone()),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            TargetSpec::Literal(value) => value.clone(),
            TargetSpec::Text(text) => Value::String(text.clone()),
            TargetSpec::Nested(template) => template.to_value(),
            TargetSpec::Sequence(specs) => {
                Value::Array(specs.iter().map(TargetSpec::to_value).collect())
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Intermediate results
// ─────────────────────────────────────────────────────────────────────────────

/// Per-item values of a field that resolved through an unpinned selector.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredList {
    pub anchor: String,
    pub items: Vec<Value>,
}

/// A field result before list alignment.
#[derive(Debug, Clone, PartialEq)]
pub enum Shaped {
    Value(Value),
    Object(Vec<(String, Shaped)>),
    Deferred(DeferredList),
}

impl Shaped {
    fn from_resolved(resolved: Resolved) -> Self {
        match resolved {
            Resolved::Single(value) => Shaped::Value(value),
            Resolved::Multi { anchor, items } => Shaped::Deferred(DeferredList {
                anchor,
                items: items.into_iter().map(Resolved::into_value).collect(),
            }),
        }
    }

    /// Materialise. With `index`, deferred lists contribute their item at
    /// that position (or their first item when shorter); without it they
    /// become arrays.
    fn materialize(&self, index: Option<usize>) -> Value {
        match self {
            Shaped::Value(value) => value.clone(),
            Shaped::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(key, shaped)| (key.clone(), shaped.materialize(index)))
                    .collect(),
            ),
            Shaped::Deferred(list) => match index {
                Some(i) => list
                    .items
                    .get(i)
                    .or_else(|| list.items.first())
                    .cloned()
                    .unwrap_or(Value::Null),
                None => Value::Array(list.items.clone()),
            },
        }
    }

    fn collect_deferred<'a>(&'a self, out: &mut Vec<&'a DeferredList>) {
        match self {
            Shaped::Value(_) => {}
            Shaped::Object(fields) => {
                for (_, shaped) in fields {
                    shaped.collect_deferred(out);
                }
            }
            Shaped::Deferred(list) => out.push(list),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct TemplateApplier {
    options: ApplyOptions,
}

impl TemplateApplier {
    pub fn new(options: ApplyOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> ApplyOptions {
        self.options
    }

    /// Produce the target-shaped output for `source`.
    pub fn apply(&self, source: &Value, template: &Template) -> Value {
        let mut output = Map::new();
        if self.options.keep_original {
            output.insert(UNMAPPED_KEY.to_string(), source.clone());
        }
        for (key, spec) in template.entries() {
            let shaped = self.apply_spec(source, key, spec);
            output.insert(key.clone(), shaped.materialize(None));
        }
        Value::Object(output)
    }

    fn apply_spec(&self, source: &Value, key: &str, spec: &TargetSpec) -> Shaped {
        match spec {
            TargetSpec::Literal(value) => Shaped::Value(value.clone()),
            TargetSpec::Text(text) => self.apply_text(source, key, text),
            TargetSpec::Nested(template) => Shaped::Object(
                template
                    .entries()
                    .iter()
                    .map(|(child, spec)| (child.clone(), self.apply_spec(source, child, spec)))
                    .collect(),
            ),
            TargetSpec::Sequence(specs) => {
                Shaped::Value(Value::Array(self.apply_sequence(source, key, specs)))
            }
        }
    }

    fn apply_text(&self, source: &Value, key: &str, text: &str) -> Shaped {
        if text.contains('$') {
            let references = find_references(text);
            if !references.is_empty() {
                return self.interpolate(source, key, text, &references);
            }
        }

        let names_top_level_key = source.as_object().is_some_and(|map| map.contains_key(text));
        // `#1` on a list source
        let indexes_root_list = source.is_array()
            && matches!(PathExpr::parse(text).segments().first(), Some(Segment::List(_)));
        if !text.contains('.') && !names_top_level_key && !indexes_root_list {
            return Shaped::Value(Value::String(text.to_string()));
        }

        // Top-level keys may themselves contain dots.
        if names_top_level_key && let Some(value) = source.get(text) {
            return Shaped::Value(value.clone());
        }

        match PathExpr::parse(text).resolve(source) {
            Ok(resolved) => Shaped::from_resolved(resolved),
            Err(err) => {
                tracing::debug!(field = key, path = text, error = %err, "keeping template value");
                Shaped::Value(Value::String(text.to_string()))
            }
        }
    }

    fn interpolate(
        &self,
        source: &Value,
        key: &str,
        text: &str,
        references: &[crate::path::Reference],
    ) -> Shaped {
        if let [only] = references
            && only.span.start == 0
            && only.span.end == text.trim_end().len()
        {
            return match only.path.resolve(source) {
                Ok(resolved) => Shaped::from_resolved(resolved),
                Err(err) => {
                    tracing::debug!(field = key, path = %only.path, error = %err, "reference did not resolve");
                    Shaped::Value(Value::String(String::new()))
                }
            };
        }

        let mut rendered = String::with_capacity(text.len());
        let mut cursor = 0;
        for reference in references {
            rendered.push_str(&text[cursor..reference.span.start]);
            match reference.path.resolve(source) {
                Ok(resolved) => rendered.push_str(&resolved.to_text()),
                Err(err) => {
                    tracing::debug!(field = key, path = %reference.path, error = %err, "reference did not resolve");
                }
            }
            cursor = reference.span.end;
        }
        rendered.push_str(&text[cursor..]);
        Shaped::Value(Value::String(rendered))
    }

    fn apply_sequence(&self, source: &Value, key: &str, specs: &[TargetSpec]) -> Vec<Value> {
        let mut output = Vec::new();
        for spec in specs {
            match spec {
                TargetSpec::Nested(template) => {
                    let shaped = self.apply_spec(source, key, spec);
                    match self.align(&shaped) {
                        Ok(entries) => output.extend(entries),
                        Err(err) => {
                            tracing::warn!(field = key, error = %err, "keeping template value for list entry");
                            output.push(template.to_value());
                        }
                    }
                }
                TargetSpec::Text(text) => match self.apply_text(source, key, text) {
                    Shaped::Deferred(list) => output.extend(list.items),
                    shaped => output.push(shaped.materialize(None)),
                },
                other => output.push(self.apply_spec(source, key, other).materialize(None)),
            }
        }
        output
    }

    /// Zip the deferred fields of one sequence element into one entry per
    /// source item.
    fn align(&self, shaped: &Shaped) -> Result<Vec<Value>> {
        let mut deferred = Vec::new();
        shaped.collect_deferred(&mut deferred);

        let Some(longest) = deferred.iter().map(|list| list.items.len()).max() else {
            return Ok(vec![shaped.materialize(None)]);
        };

        if self.options.list_alignment == ListAlignment::Strict
            && let Some(first) = deferred.first()
            && let Some(mismatch) = deferred
                .iter()
                .find(|list| list.items.len() != first.items.len())
        {
            return Err(SchemalessError::ListLengthMismatch {
                anchor: mismatch.anchor.clone(),
                expected: first.items.len(),
                found: mismatch.items.len(),
            });
        }

        Ok((0..longest).map(|i| shaped.materialize(Some(i))).collect())
    }
}

/// Apply a template given as raw JSON.
pub fn apply_template(source: &Value, template: &Value, options: ApplyOptions) -> Result<Value> {
    let template = Template::from_value(template)?;
    Ok(TemplateApplier::new(options).apply(source, &template))
}

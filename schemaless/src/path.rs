//! Path expressions over dynamically-typed JSON trees.
//!
//! A path is a `.`-joined list of segments. A segment is either an object key
//! or a list selector:
//!
//! | selector | meaning |
//! |----------|---------|
//! | `#`      | every item |
//! | `#N`     | item `N` (`#min` first, `#max` last) |
//! | `#N-M`   | items `N..=M`; either bound may be empty, `min` or `max` |
//!
//! Selecting through `#` or a range yields a [`Resolved::Multi`] with one
//! resolution per item, so callers can line up several fields that index into
//! the same list.

use crate::errors::{Result, SchemalessError};
use regex_lite::Regex;
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use std::sync::OnceLock;

/// One bound of a list selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    First,
    Last,
    At(usize),
}

impl Bound {
    fn parse(text: &str, open: Bound) -> Option<Bound> {
        match text {
            "" => Some(open),
            "min" => Some(Bound::First),
            "max" => Some(Bound::Last),
            digits if digits.bytes().all(|b| b.is_ascii_digit()) => {
                digits.parse().ok().map(Bound::At)
            }
            _ => None,
        }
    }

    fn index(self, len: usize) -> Option<usize> {
        match self {
            Bound::First if len > 0 => Some(0),
            Bound::Last if len > 0 => Some(len - 1),
            Bound::At(n) if n < len => Some(n),
            _ => None,
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::First => f.write_str("min"),
            Bound::Last => f.write_str("max"),
            Bound::At(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListSelector {
    All,
    Index(Bound),
    Range { start: Bound, end: Bound },
}

impl ListSelector {
    /// Parse the text of a segment. Returns `None` for anything that is not a
    /// list selector, which callers then treat as an object key.
    pub fn parse(segment: &str) -> Option<Self> {
        let rest = segment.strip_prefix('#')?;
        if rest.is_empty() {
            return Some(ListSelector::All);
        }
        match rest.split_once('-') {
            Some((start, end)) => Some(ListSelector::Range {
                start: Bound::parse(start, Bound::First)?,
                end: Bound::parse(end, Bound::Last)?,
            }),
            None => match rest {
                "min" => Some(ListSelector::Index(Bound::First)),
                "max" => Some(ListSelector::Index(Bound::Last)),
                digits if digits.bytes().all(|b| b.is_ascii_digit()) => {
                    digits.parse().ok().map(|n| ListSelector::Index(Bound::At(n)))
                }
                _ => None,
            },
        }
    }

    /// Whether the selector can pick more than one item.
    pub fn is_unpinned(&self) -> bool {
        !matches!(self, ListSelector::Index(_))
    }

    /// Item indices selected from a list of `len` items.
    pub fn indices(&self, len: usize) -> Option<std::ops::Range<usize>> {
        match self {
            ListSelector::All => Some(0..len),
            ListSelector::Index(bound) => bound.index(len).map(|i| i..i + 1),
            ListSelector::Range { start, end } => {
                let start = start.index(len)?;
                let end = end.index(len)?;
                (start <= end).then_some(start..end + 1)
            }
        }
    }
}

impl fmt::Display for ListSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListSelector::All => f.write_str("#"),
            ListSelector::Index(bound) => write!(f, "#{bound}"),
            ListSelector::Range { start, end } => write!(f, "#{start}-{end}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    List(ListSelector),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) => f.write_str(key),
            Segment::List(selector) => selector.fmt(f),
        }
    }
}

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PathExpr {
    segments: Vec<Segment>,
}

impl PathExpr {
    /// Parse a path, normalising the loose spellings found in templates:
    /// `items[].id` becomes `items.#.id`, quotes are dropped, and a leading
    /// `$` or trailing `.` is trimmed.
    pub fn parse(raw: &str) -> Self {
        let normalized = normalize(raw);
        let segments = normalized
            .split('.')
            .filter(|part| !part.is_empty())
            .map(|part| match ListSelector::parse(part) {
                Some(selector) => Segment::List(selector),
                None => Segment::Key(part.to_string()),
            })
            .collect();
        Self { segments }
    }

    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// First key segment, if the path starts with one.
    pub fn head_key(&self) -> Option<&str> {
        match self.segments.first() {
            Some(Segment::Key(key)) => Some(key),
            _ => None,
        }
    }

    /// Resolve the path against `root`.
    pub fn resolve(&self, root: &Value) -> Result<Resolved> {
        self.resolve_from(root, 0)
    }

    fn resolve_from(&self, node: &Value, idx: usize) -> Result<Resolved> {
        let Some(segment) = self.segments.get(idx) else {
            return Ok(Resolved::Single(node.clone()));
        };
        let node = decode_embedded(node);

        match (segment, node.as_ref()) {
            (Segment::Key(key), Value::Object(map)) => match map.get(key) {
                Some(child) => self.resolve_from(child, idx + 1),
                None => Err(SchemalessError::path_not_found(self.prefix(idx + 1), key)),
            },
            (Segment::Key(_), other) => Err(SchemalessError::type_mismatch(
                self.prefix(idx),
                "object",
                type_name(other),
            )),
            (Segment::List(selector), Value::Array(items)) => {
                let Some(range) = selector.indices(items.len()) else {
                    return Err(SchemalessError::path_not_found(
                        self.prefix(idx + 1),
                        selector.to_string(),
                    ));
                };
                if !selector.is_unpinned() {
                    return self.resolve_from(&items[range.start], idx + 1);
                }

                let mut first_error = None;
                let mut resolved = Vec::new();
                for item in &items[range] {
                    match self.resolve_from(item, idx + 1) {
                        Ok(value) => resolved.push(value),
                        Err(err) => {
                            tracing::debug!(error = %err, path = %self, "list item did not resolve");
                            resolved.push(Resolved::Single(Value::Null));
                            first_error.get_or_insert(err);
                        }
                    }
                }
                if let Some(err) = first_error
                    && resolved.iter().all(Resolved::is_null)
                {
                    return Err(err);
                }
                Ok(Resolved::Multi {
                    anchor: self.prefix(idx + 1),
                    items: resolved,
                })
            }
            (Segment::List(_), other) => Err(SchemalessError::type_mismatch(
                self.prefix(idx),
                "array",
                type_name(other),
            )),
        }
    }

    /// The first `len` segments joined back into a path.
    fn prefix(&self, len: usize) -> String {
        PathExpr::from_segments(self.segments[..len.min(self.segments.len())].to_vec()).to_string()
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            segment.fmt(f)?;
        }
        Ok(())
    }
}

/// Resolve a raw path string against `root`.
pub fn resolve(root: &Value, path: &str) -> Result<Resolved> {
    PathExpr::parse(path).resolve(root)
}

/// Result of resolving a path.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Single(Value),
    /// One resolution per item selected by an unpinned selector. `anchor` is
    /// the path up to and including that selector.
    Multi { anchor: String, items: Vec<Resolved> },
}

impl Resolved {
    pub fn is_multi(&self) -> bool {
        matches!(self, Resolved::Multi { .. })
    }

    fn is_null(&self) -> bool {
        matches!(self, Resolved::Single(Value::Null))
    }

    /// Materialise as JSON; multi-results become arrays.
    pub fn to_value(&self) -> Value {
        match self {
            Resolved::Single(value) => value.clone(),
            Resolved::Multi { items, .. } => {
                Value::Array(items.iter().map(Resolved::to_value).collect())
            }
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Resolved::Single(value) => value,
            Resolved::Multi { items, .. } => {
                Value::Array(items.into_iter().map(Resolved::into_value).collect())
            }
        }
    }

    /// Stringify for interpolation: strings raw, everything else compact JSON.
    pub fn to_text(&self) -> String {
        value_to_text(&self.to_value())
    }
}

pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Strings holding a JSON object or array are treated as that value when a
/// selector is applied to them.
pub(crate) fn decode_embedded(node: &Value) -> Cow<'_, Value> {
    if let Value::String(text) = node {
        let trimmed = text.trim();
        let looks_structured = (trimmed.starts_with('{') && trimmed.ends_with('}'))
            || (trimmed.starts_with('[') && trimmed.ends_with(']'));
        if looks_structured
            && let Ok(decoded) = serde_json::from_str::<Value>(trimmed)
            && (decoded.is_object() || decoded.is_array())
        {
            return Cow::Owned(decoded);
        }
    }
    Cow::Borrowed(node)
}

fn normalize(raw: &str) -> String {
    let cleaned = raw.trim().replace('"', "").replace("[]", ".#");
    cleaned
        .trim_start_matches('$')
        .trim_end_matches('.')
        .to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Interpolation references
// ─────────────────────────────────────────────────────────────────────────────

/// A `$path` reference found inside free text.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    /// Byte range of the reference in the text, including the `$`.
    pub span: std::ops::Range<usize>,
    pub path: PathExpr,
}

#[allow(clippy::expect_used)]
fn reference_regex() -> &'static Regex {
    static REFERENCE_RE: OnceLock<Regex> = OnceLock::new();
    REFERENCE_RE.get_or_init(|| {
        Regex::new(r"\$[a-zA-Z0-9_@-]+(\.[a-zA-Z0-9#_@-]+)*\.?").expect("valid reference regex")
    })
}

/// Find every `$path` reference in `text`, in order of appearance.
pub fn find_references(text: &str) -> Vec<Reference> {
    reference_regex()
        .find_iter(text)
        .map(|m| {
            // A sentence-ending dot belongs to the text, not the path.
            let matched = m.as_str().trim_end_matches('.');
            Reference {
                span: m.start()..m.start() + matched.len(),
                path: PathExpr::parse(matched),
            }
        })
        .collect()
}

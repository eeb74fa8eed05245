//! Template generation via an external black-box generator (typically an
//! LLM).
//!
//! Key components:
//! - `TemplateGenerator` trait: the only seam to the external service
//! - `GenerationRequest`: the standard, the source payload and the rendered query
//! - `build_generation_prompt()` / `build_generation_query()`: prompt assembly
//! - `parse_generated_template()`: cleans and validates generator output

use async_trait::async_trait;
use serde_json::Value;

use crate::apply::Template;
use crate::errors::{Result, SchemalessError};
use crate::shape::skeleton;

// ─────────────────────────────────────────────────────────────────────────────
// Data Types
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a generator needs to propose a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Raw standard document
    pub standard: String,
    /// Source payload (or its skeleton when the source is large)
    pub shape: String,
    /// Instructions for the generator
    pub system: String,
    /// Rendered user query combining `standard` and `shape`
    pub query: String,
}

impl GenerationRequest {
    pub fn new(standard: impl Into<String>, shape: impl Into<String>) -> Self {
        let standard = standard.into();
        let shape = shape.into();
        let query = build_generation_query(&standard, &shape);
        Self {
            standard,
            shape,
            system: build_generation_prompt(),
            query,
        }
    }
}

/// Trait for template generation
///
/// Implementations receive the fully-rendered request and return the raw
/// generator output. Code fences around the output are tolerated.
#[async_trait]
pub trait TemplateGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<u8>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Prompt Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Instructions that teach the generator the template language.
pub fn build_generation_prompt() -> String {
    r#"You map a user's JSON document onto a fixed standard. Reply with a JSON object that has exactly the keys of the standard and nothing else. The standard's values describe what each field should hold; use them to decide where to look in the user input.

For every key, the value you return is a path into the user input:
- Nested fields are joined with dots, for example `secret.version.value`. Always point at the most specific field, such as `fields.id` rather than `fields`.
- Prefix each path with a dollar sign: `$fields.summary`.
- Descriptive text may embed several paths: `Ticket $data.id titled $data.title was created`.
- Lists use `#` for every item, `#N` for one item and `#N-M` for a range: `$alerts.#.title`.
- Leave a key as an empty string when nothing in the input fits.

Example: for the standard {"id": "The id of the ticket", "title": "The ticket title"} and the input {"key": "12345", "fields": {"id": "1234", "summary": "The title of the ticket"}}, reply {"id": "$key", "title": "$fields.summary"}."#
        .to_string()
}

pub fn build_generation_query(standard: &str, shape: &str) -> String {
    format!("Standard:\n```json\n{standard}\n```\n\nUser Input:\n```json\n{shape}\n```")
}

/// Serialise the source for the generator. Inputs above `max_bytes` are
/// reduced to their skeleton first.
pub fn generation_payload(source: &Value, max_bytes: usize) -> Result<String> {
    let full = serde_json::to_string_pretty(source)
        .map_err(|e| SchemalessError::malformed_with_source("failed to serialise input", e))?;
    if full.len() <= max_bytes {
        return Ok(full);
    }

    let reduced = serde_json::to_string_pretty(&skeleton(source))
        .map_err(|e| SchemalessError::malformed_with_source("failed to serialise skeleton", e))?;
    if reduced.len() <= max_bytes {
        tracing::debug!(
            full_len = full.len(),
            reduced_len = reduced.len(),
            "sending input skeleton to generator"
        );
        return Ok(reduced);
    }

    Err(SchemalessError::malformed(format!(
        "input too large for generation: {} > {max_bytes} bytes",
        reduced.len()
    )))
}

// ─────────────────────────────────────────────────────────────────────────────
// Output Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Strip a surrounding ```` ``` ```` or ```` ```json ```` fence.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parse generator output into a template.
pub fn parse_generated_template(raw: &[u8]) -> Result<Template> {
    let text = String::from_utf8_lossy(raw);
    let cleaned = strip_code_fence(&text);
    let value: Value = serde_json::from_str(cleaned).map_err(|e| {
        SchemalessError::generation_with_source("generator returned invalid JSON", e)
    })?;
    Template::from_value(&value)
}

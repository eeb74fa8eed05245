//! Translation orchestrator.
//!
//! A translation runs in this order:
//! 1. parse the source (JSON or YAML) and fingerprint its shape
//! 2. look up a learned template for `(standard, shape)`, first in the cache
//!    and then in the sample store
//! 3. on a miss, load the standard; a standard naming another standard in
//!    brackets (`[ticket]`) translates every item of the source list with it
//! 4. otherwise infer the template from an expected output, or ask the
//!    generator for one under single-flight coordination
//! 5. apply the template to the source
//!
//! Persisting samples and caching templates are best-effort. Failures there
//! are logged and never fail a translation.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::apply::{ApplyOptions, Template, TemplateApplier};
use crate::cache::{Cache, ChunkedCache};
use crate::config::SchemalessConfig;
use crate::errors::{Result, SchemalessError};
use crate::generation::{
    GenerationRequest, TemplateGenerator, generation_payload, parse_generated_template,
};
use crate::input::parse_input;
use crate::retry::{RetryConfig, retry_fixed};
use crate::reverse::infer_template;
use crate::shape::{shape_token, skeleton, template_key};
use crate::single_flight::SingleFlight;
use crate::store::{
    NS_INPUT, NS_OUTPUT, NS_QUERIES, SampleStore, StandardStore, namespaced,
};

/// One translation call.
#[derive(Debug, Clone, Default)]
pub struct TranslateRequest {
    /// Target standard name; a `.json` suffix is ignored
    pub standard: String,
    /// Raw source document
    pub input: Vec<u8>,
    /// Copy the untouched source under `unmapped` in the output
    pub keep_original: bool,
    /// Treat a bracketed standard as a plain standard (set on fan-out items)
    pub skip_sub_standard: bool,
    /// Prepended to the template key, so callers can keep separate templates
    /// for identical shapes
    pub reference_prefix: String,
    /// Known output for this source; when every value can be located the
    /// template is inferred from it instead of generated
    pub expected: Option<Value>,
}

impl TranslateRequest {
    pub fn new(standard: impl Into<String>, input: impl Into<Vec<u8>>) -> Self {
        Self {
            standard: standard.into(),
            input: input.into(),
            ..Self::default()
        }
    }

    pub fn keep_original(mut self, keep: bool) -> Self {
        self.keep_original = keep;
        self
    }

    pub fn reference_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.reference_prefix = prefix.into();
        self
    }

    pub fn expected(mut self, expected: Value) -> Self {
        self.expected = Some(expected);
        self
    }

    fn for_item(&self, standard: &str, item: &Value) -> Result<Self> {
        let input = serde_json::to_vec(item).map_err(|e| {
            SchemalessError::internal(format!("failed to serialise list item: {e}"))
        })?;
        Ok(Self {
            standard: standard.to_string(),
            input,
            keep_original: self.keep_original,
            skip_sub_standard: true,
            reference_prefix: self.reference_prefix.clone(),
            expected: None,
        })
    }
}

/// Translates documents onto standards. Cheap to clone; clones share every
/// collaborator.
#[derive(Clone)]
pub struct Translator {
    cache: ChunkedCache,
    standards: Arc<dyn StandardStore>,
    samples: Arc<dyn SampleStore>,
    generator: Arc<dyn TemplateGenerator>,
    flight: SingleFlight,
    config: Arc<SchemalessConfig>,
}

impl Translator {
    pub fn new(
        config: SchemalessConfig,
        cache: Arc<dyn Cache>,
        standards: Arc<dyn StandardStore>,
        samples: Arc<dyn SampleStore>,
        generator: Arc<dyn TemplateGenerator>,
    ) -> Self {
        let cache = ChunkedCache::new(cache, config.cache.max_chunks);
        let flight = SingleFlight::new(
            cache.clone(),
            config.single_flight.clone(),
            config.cache.template_ttl(),
        );
        Self {
            cache,
            standards,
            samples,
            generator,
            flight,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &SchemalessConfig {
        &self.config
    }

    /// Translate `request.input` onto `request.standard`.
    pub async fn translate(
        &self,
        request: TranslateRequest,
        token: &CancellationToken,
    ) -> Result<Value> {
        if token.is_cancelled() {
            return Err(SchemalessError::Cancelled);
        }

        let source = parse_input(&request.input)?;
        let shape = shape_token(&source);
        let key = template_key(&request.reference_prefix, &request.standard, &shape);
        tracing::debug!(standard = %request.standard, key = %key, "translating");

        match serde_json::to_vec_pretty(&skeleton(&source)) {
            Ok(bytes) => self.save_sample(NS_INPUT, &key, &bytes).await,
            Err(err) => tracing::warn!(error = %err, key = %key, "failed to serialise skeleton"),
        }

        let template = match self.known_template(&key).await {
            Some(template) => template,
            None => {
                let standard = self.standards.load(&request.standard).await?;
                if !request.skip_sub_standard
                    && let Some(sub_standard) = sub_standard_name(&standard)
                {
                    // The referenced standard must exist before any item runs.
                    self.standards.load(&sub_standard).await?;
                    return self.fan_out(&sub_standard, &source, &request, token).await;
                }
                self.learn_template(&key, &standard, &source, &request, token)
                    .await?
            }
        };

        let options = ApplyOptions {
            list_alignment: self.config.apply.list_alignment,
            keep_original: request.keep_original,
        };
        Ok(TemplateApplier::new(options).apply(&source, &template))
    }

    /// Owned, boxed form of [`Translator::translate`] for spawning.
    pub fn translate_boxed(
        &self,
        request: TranslateRequest,
        token: CancellationToken,
    ) -> BoxFuture<'static, Result<Value>> {
        let this = self.clone();
        async move { this.translate(request, &token).await }.boxed()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Template lookup
    // ─────────────────────────────────────────────────────────────────────────

    async fn known_template(&self, key: &str) -> Option<Template> {
        let ttl = self.config.cache.template_ttl();

        match self.cache.get(key).await {
            Ok(Some(bytes)) => match parse_generated_template(&bytes) {
                Ok(template) => {
                    tracing::debug!(key, "template cache hit");
                    self.cache_template(key, &bytes, ttl).await;
                    return Some(template);
                }
                Err(err) => tracing::warn!(error = %err, key, "ignoring unreadable cached template"),
            },
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, key, "template cache unavailable"),
        }

        match self.samples.load(&namespaced(NS_OUTPUT, key)).await {
            Ok(Some(bytes)) => match parse_generated_template(&bytes) {
                Ok(template) => {
                    tracing::debug!(key, "template found in store");
                    self.cache_template(key, &bytes, ttl).await;
                    Some(template)
                }
                Err(err) => {
                    tracing::warn!(error = %err, key, "ignoring unreadable stored template");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, key, "sample store unavailable");
                None
            }
        }
    }

    /// Produce a template for a shape seen for the first time.
    async fn learn_template(
        &self,
        key: &str,
        standard: &[u8],
        source: &Value,
        request: &TranslateRequest,
        token: &CancellationToken,
    ) -> Result<Template> {
        if let Some(expected) = &request.expected {
            let inferred = infer_template(source, expected)?;
            if inferred.complete {
                tracing::info!(key, "template inferred from expected output");
                let bytes = template_bytes(&inferred.template)?;
                self.save_sample(NS_OUTPUT, key, &bytes).await;
                self.cache_template(key, &bytes, self.config.cache.template_ttl())
                    .await;
                return Ok(inferred.template);
            }
            tracing::debug!(
                key,
                unmatched = ?inferred.unmatched,
                "expected output only partly located, generating"
            );
        }

        let payload = generation_payload(source, self.config.generation.max_input_bytes)?;
        let generation = GenerationRequest::new(String::from_utf8_lossy(standard), payload);
        let retry = RetryConfig::from(&self.config.generation);
        let generator = self.generator.clone();

        let bytes = self
            .flight
            .run(key, token, || async move {
                self.save_sample(NS_QUERIES, key, generation.query.as_bytes())
                    .await;
                tracing::info!(key, "generating template");
                let (generator, generation) = (&generator, &generation);
                retry_fixed(
                    move || async move {
                        let raw = generator.generate(generation).await?;
                        template_bytes(&parse_generated_template(&raw)?)
                    },
                    &retry,
                    token,
                )
                .await
            })
            .await?;

        let template = parse_generated_template(&bytes)?;
        self.save_sample(NS_OUTPUT, key, &bytes).await;
        Ok(template)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sub-standard fan-out
    // ─────────────────────────────────────────────────────────────────────────

    /// Translate every item of the source list with `sub_standard`.
    ///
    /// The first item runs alone so it can prime the template cache for the
    /// rest. Output order follows source order; failing items are left out.
    async fn fan_out(
        &self,
        sub_standard: &str,
        source: &Value,
        request: &TranslateRequest,
        token: &CancellationToken,
    ) -> Result<Value> {
        let Some(items) = list_items(source) else {
            tracing::debug!(sub_standard, "no list in source, nothing to translate");
            return Ok(Value::Array(Vec::new()));
        };

        let max_items = self.config.fanout.max_items;
        let items = if items.len() > max_items {
            tracing::warn!(
                sub_standard,
                total = items.len(),
                max_items,
                "list too long, translating only the first items"
            );
            &items[..max_items]
        } else {
            items
        };
        let Some((first, rest)) = items.split_first() else {
            return Ok(Value::Array(Vec::new()));
        };
        tracing::debug!(sub_standard, items = items.len(), "translating list items");

        let mut results: Vec<Option<Value>> = vec![None; items.len()];
        let first = request.for_item(sub_standard, first)?;
        match self.translate_boxed(first, token.clone()).await {
            Ok(value) => results[0] = Some(value),
            Err(SchemalessError::Cancelled) => return Err(SchemalessError::Cancelled),
            Err(err) => tracing::warn!(error = %err, index = 0, "list item translation failed"),
        }

        let semaphore = Arc::new(Semaphore::new(self.config.fanout.max_in_flight.max(1)));
        let mut workers = JoinSet::new();
        for (offset, item) in rest.iter().enumerate() {
            let index = offset + 1;
            let child = self.translate_boxed(request.for_item(sub_standard, item)?, token.clone());
            let permits = Arc::clone(&semaphore);
            workers.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (index, Err(SchemalessError::internal("fan-out semaphore closed")));
                };
                (index, child.await)
            });
        }

        loop {
            let joined = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    workers.abort_all();
                    return Err(SchemalessError::Cancelled);
                }
                joined = workers.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };
            match joined {
                Ok((index, Ok(value))) => results[index] = Some(value),
                Ok((_, Err(SchemalessError::Cancelled))) => {
                    workers.abort_all();
                    return Err(SchemalessError::Cancelled);
                }
                Ok((index, Err(err))) => {
                    tracing::warn!(error = %err, index, "list item translation failed");
                }
                Err(err) => tracing::error!(error = %err, "list item worker panicked"),
            }
        }

        Ok(Value::Array(results.into_iter().flatten().collect()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Best-effort persistence
    // ─────────────────────────────────────────────────────────────────────────

    async fn save_sample(&self, namespace: &str, key: &str, bytes: &[u8]) {
        let name = namespaced(namespace, key);
        if let Err(err) = self.samples.save(&name, bytes).await {
            tracing::warn!(error = %err, key = %name, "failed to persist sample");
        }
    }

    async fn cache_template(&self, key: &str, bytes: &[u8], ttl: std::time::Duration) {
        if let Err(err) = self.cache.set(key, bytes, ttl).await {
            tracing::warn!(error = %err, key, "failed to cache template");
        }
    }
}

fn template_bytes(template: &Template) -> Result<Vec<u8>> {
    serde_json::to_vec(&template.to_value())
        .map_err(|e| SchemalessError::internal(format!("failed to serialise template: {e}")))
}

/// Name of the standard referenced by a bracketed standard body such as
/// `[ticket]` or `["ticket.json"]`.
fn sub_standard_name(standard: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(standard).ok()?.trim();
    let inner = text.strip_prefix('[')?.strip_suffix(']')?.trim();
    let name = inner.trim_matches('"').trim();
    if name.is_empty() || name.contains(['{', '}', '[', ']', ',', '"']) {
        return None;
    }
    Some(name.trim_end_matches(".json").to_string())
}

/// The source itself when it is a list, otherwise its first list-valued field.
fn list_items(source: &Value) -> Option<&[Value]> {
    match source {
        Value::Array(items) => Some(items),
        Value::Object(map) => map.values().find_map(|value| value.as_array().map(Vec::as_slice)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn recognises_sub_standards() {
        assert_eq!(sub_standard_name(b"[ticket]"), Some("ticket".to_string()));
        assert_eq!(sub_standard_name(b" [\"ticket.json\"] "), Some("ticket".to_string()));
        assert_eq!(sub_standard_name(br#"{"id": ""}"#), None);
        assert_eq!(sub_standard_name(b"[]"), None);
        assert_eq!(sub_standard_name(br#"[{"id": ""}]"#), None);
        assert_eq!(sub_standard_name(b"[a, b]"), None);
    }

    #[test]
    fn finds_list_items() {
        let list = json!([{"a": 1}]);
        assert_eq!(list_items(&list).map(<[Value]>::len), Some(1));

        let wrapped = json!({"total": 2, "results": [{"a": 1}, {"a": 2}], "other": []});
        assert_eq!(list_items(&wrapped).map(<[Value]>::len), Some(2));

        assert_eq!(list_items(&json!({"a": {"b": [1]}})), None);
    }

    #[test]
    fn item_requests_skip_sub_standards() {
        let parent = TranslateRequest::new("tickets", "[]")
            .keep_original(true)
            .reference_prefix("org1-")
            .expected(json!({"id": "1"}));
        let child = parent.for_item("ticket", &json!({"id": 1})).expect("serialisable");

        assert_eq!(child.standard, "ticket");
        assert_eq!(child.input, br#"{"id":1}"#.to_vec());
        assert!(child.skip_sub_standard);
        assert!(child.keep_original);
        assert_eq!(child.reference_prefix, "org1-");
        assert_eq!(child.expected, None);
    }
}

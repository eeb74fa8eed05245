//! Standard and sample stores.
//!
//! Standards are the fixed target schemas. Samples are the artifacts a
//! translation leaves behind: input skeletons, generator queries and learned
//! templates, each under its own namespace.

use crate::errors::{Result, SchemalessError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::RwLock;

/// Skeletons of translated inputs.
pub const NS_INPUT: &str = "translation_input";
/// Raw queries sent to the template generator.
pub const NS_QUERIES: &str = "translation_ai_queries";
/// Learned templates.
pub const NS_OUTPUT: &str = "translation_output";
/// Target standards.
pub const NS_STANDARDS: &str = "translation_standards";

pub fn namespaced(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Source of target standards.
#[async_trait]
pub trait StandardStore: Send + Sync {
    /// Load a standard by name. A `.json` suffix on the name is ignored.
    async fn load(&self, standard: &str) -> Result<Vec<u8>>;
}

/// Persistence for translation artifacts, keyed by namespaced name.
#[async_trait]
pub trait SampleStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn save(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStandardStore {
    standards: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStandardStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_standard(self, name: &str, body: impl Into<Vec<u8>>) -> Self {
        self.insert(name, body);
        self
    }

    pub fn insert(&self, name: &str, body: impl Into<Vec<u8>>) {
        match self.standards.write() {
            Ok(mut standards) => {
                standards.insert(trim_json(name).to_string(), body.into());
            }
            Err(_) => tracing::error!(standard = name, "standard store lock poisoned"),
        }
    }
}

#[async_trait]
impl StandardStore for MemoryStandardStore {
    async fn load(&self, standard: &str) -> Result<Vec<u8>> {
        let standards = self
            .standards
            .read()
            .map_err(|_| SchemalessError::store("standard store lock poisoned"))?;
        standards
            .get(trim_json(standard))
            .cloned()
            .ok_or_else(|| SchemalessError::store(format!("standard '{standard}' not found")))
    }
}

fn trim_json(name: &str) -> &str {
    name.strip_suffix(".json").unwrap_or(name)
}

#[derive(Debug, Default)]
pub struct MemorySampleStore {
    samples: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemorySampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.samples
            .lock()
            .map(|samples| samples.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SampleStore for MemorySampleStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let samples = self
            .samples
            .lock()
            .map_err(|_| SchemalessError::store("sample store lock poisoned"))?;
        Ok(samples.get(key).cloned())
    }

    async fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.samples
            .lock()
            .map_err(|_| SchemalessError::store("sample store lock poisoned"))?
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn standard_names_ignore_json_suffix() {
        let store = MemoryStandardStore::new().with_standard("users.json", r#"{"id": ""}"#);

        assert_eq!(store.load("users").await.expect("load"), br#"{"id": ""}"#.to_vec());
        assert_eq!(store.load("users.json").await.expect("load"), br#"{"id": ""}"#.to_vec());
    }

    #[tokio::test]
    async fn missing_standard_is_store_error() {
        let err = MemoryStandardStore::new()
            .load("tickets")
            .await
            .expect_err("missing");
        assert_eq!(err.to_string(), "store error: standard 'tickets' not found");
    }

    #[tokio::test]
    async fn samples_round_trip() {
        let store = MemorySampleStore::new();
        let key = namespaced(NS_OUTPUT, "users-abc");
        store.save(&key, b"{}").await.expect("save");

        assert_eq!(store.load(&key).await.expect("load"), Some(b"{}".to_vec()));
        assert_eq!(store.load("absent").await.expect("load"), None);
        assert_eq!(store.keys(), vec!["translation_output/users-abc".to_string()]);
    }
}

//! Cache collaborator and the chunking layer on top of it.
//!
//! Backends such as memcached cap the size of a single entry. [`ChunkedCache`]
//! splits larger values across `key`, `key_1`, `key_2`, … and stitches them
//! back together on read. A chunk shorter than the backend's limit ends the
//! value, so a value that fills its last chunk exactly is followed by an empty
//! terminator chunk.

use crate::errors::{Result, SchemalessError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Key/value cache with per-entry expiry.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Largest value a single entry can hold, if the backend has a limit.
    fn max_entry_size(&self) -> Option<usize> {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Chunking
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ChunkedCache {
    inner: Arc<dyn Cache>,
    max_chunks: usize,
}

impl ChunkedCache {
    pub fn new(inner: Arc<dyn Cache>, max_chunks: usize) -> Self {
        Self {
            inner,
            max_chunks: max_chunks.max(1),
        }
    }

    pub fn inner(&self) -> &Arc<dyn Cache> {
        &self.inner
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(key) = normalize_key(key) else {
            return Ok(None);
        };
        let Some(first) = self.inner.get(&key).await? else {
            return Ok(None);
        };
        let Some(limit) = self.inner.max_entry_size().filter(|limit| *limit > 0) else {
            return Ok(Some(first));
        };

        let mut value = first;
        let mut last_len = value.len();
        let mut index = 1;
        while last_len >= limit && index < self.max_chunks {
            let Some(chunk) = self.inner.get(&chunk_key(&key, index)).await? else {
                break;
            };
            last_len = chunk.len();
            value.extend_from_slice(&chunk);
            index += 1;
        }
        Ok(Some(value))
    }

    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let Some(key) = normalize_key(key) else {
            tracing::warn!(len = value.len(), "skipping cache write for empty key");
            return Ok(());
        };
        let Some(limit) = self.inner.max_entry_size().filter(|limit| *limit > 0) else {
            return self.inner.set(&key, value, ttl).await;
        };

        let capacity = limit * self.max_chunks;
        if value.len() > capacity {
            return Err(SchemalessError::cache(format!(
                "value for '{key}' too large: {} > {capacity}",
                value.len()
            )));
        }

        let mut chunks: Vec<&[u8]> = value.chunks(limit).collect();
        if chunks.last().is_none_or(|chunk| chunk.len() == limit) && chunks.len() < self.max_chunks {
            chunks.push(&[]);
        }
        for (index, chunk) in chunks.into_iter().enumerate() {
            self.inner.set(&chunk_key(&key, index), chunk, ttl).await?;
        }
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let Some(key) = normalize_key(key) else {
            return Ok(());
        };
        self.inner.delete(&key).await?;
        if self.inner.max_entry_size().is_some() {
            for index in 1..self.max_chunks {
                self.inner.delete(&chunk_key(&key, index)).await?;
            }
        }
        Ok(())
    }
}

fn normalize_key(key: &str) -> Option<String> {
    if key.is_empty() {
        return None;
    }
    Some(key.replace(' ', "_"))
}

fn chunk_key(key: &str, index: usize) -> String {
    if index == 0 {
        key.to_string()
    } else {
        format!("{key}_{index}")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory backend
// ─────────────────────────────────────────────────────────────────────────────

/// Process-local TTL cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
    max_entry_size: Option<usize>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject single entries above `limit` bytes, like memcached does.
    pub fn with_max_entry_size(limit: usize) -> Self {
        Self {
            entries: Mutex::default(),
            max_entry_size: Some(limit),
        }
    }

    /// Live entries, expired ones excluded.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map(|entries| entries.values().filter(|(_, expires)| *expires > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, (Vec<u8>, Instant)>>> {
        self.entries
            .lock()
            .map_err(|_| SchemalessError::cache("memory cache lock poisoned"))
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.lock()?;
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        if let Some(limit) = self.max_entry_size
            && value.len() > limit
        {
            return Err(SchemalessError::cache(format!(
                "entry '{key}' exceeds {limit} bytes"
            )));
        }
        self.lock()?
            .insert(key.to_string(), (value.to_vec(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn max_entry_size(&self) -> Option<usize> {
        self.max_entry_size
    }
}

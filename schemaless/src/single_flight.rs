//! Single-flight coordination of expensive template generation.
//!
//! Concurrent callers asking for the same template key race on a short-lived
//! `<key>-started` lock entry in the shared cache. The winner generates and
//! stores the result; everyone else polls the result key for a bounded time
//! and generates on their own only if it never shows up. De-duplication is
//! best-effort: it narrows the window, it does not guarantee a single call.
//!
//! Cache failures never fail a caller. They are logged and treated as
//! "absent".

use crate::cache::ChunkedCache;
use crate::config::SingleFlightConfig;
use crate::errors::Result;
use rand::Rng;
use schemaless_async_utils::{OrCancelExt, poll_with_interval, sleep_or_cancel};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const LOCK_VALUE: &[u8] = b"started";

pub fn lock_key(key: &str) -> String {
    format!("{key}-started")
}

#[derive(Clone)]
pub struct SingleFlight {
    cache: ChunkedCache,
    config: SingleFlightConfig,
    result_ttl: Duration,
}

impl SingleFlight {
    pub fn new(cache: ChunkedCache, config: SingleFlightConfig, result_ttl: Duration) -> Self {
        Self {
            cache,
            config,
            result_ttl,
        }
    }

    /// Return the cached value for `key`, or run `generate` and cache its
    /// output unless another caller is already doing so.
    pub async fn run<F, Fut>(
        &self,
        key: &str,
        token: &CancellationToken,
        generate: F,
    ) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Vec<u8>>> + Send,
    {
        self.jitter(token).await?;

        let lock = lock_key(key);
        if self.probe(&lock).await.is_some() {
            tracing::debug!(key, "generation in flight elsewhere, waiting for result");
            let waited = poll_with_interval(
                self.config.poll_interval(),
                self.config.poll_attempts,
                token,
                || self.probe(key),
            )
            .await?;
            if let Some(value) = waited {
                return Ok(value);
            }
            tracing::warn!(
                key,
                attempts = self.config.poll_attempts,
                "gave up waiting for in-flight generation, generating locally"
            );
        } else {
            self.store(&lock, LOCK_VALUE, self.config.lock_ttl()).await;
        }

        if let Some(value) = self.probe(key).await {
            return Ok(value);
        }

        match generate().or_cancel(token).await? {
            Ok(value) => {
                self.store(key, &value, self.result_ttl).await;
                Ok(value)
            }
            Err(err) => {
                if let Err(cache_err) = self.cache.delete(&lock).await {
                    tracing::debug!(error = %cache_err, key, "failed to release generation lock");
                }
                Err(err)
            }
        }
    }

    async fn jitter(&self, token: &CancellationToken) -> Result<()> {
        if self.config.max_jitter_ms == 0 {
            return Ok(());
        }
        let delay = rand::rng().random_range(0..=self.config.max_jitter_ms);
        sleep_or_cancel(Duration::from_millis(delay), token).await?;
        Ok(())
    }

    async fn probe(&self, key: &str) -> Option<Vec<u8>> {
        match self.cache.get(key).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, key, "cache unavailable, treating entry as absent");
                None
            }
        }
    }

    async fn store(&self, key: &str, value: &[u8], ttl: Duration) {
        if let Err(err) = self.cache.set(key, value, ttl).await {
            tracing::warn!(error = %err, key, "cache unavailable, entry not stored");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, MemoryCache};
    use crate::errors::SchemalessError;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(86_400);

    fn config(poll_attempts: usize) -> SingleFlightConfig {
        SingleFlightConfig {
            lock_ttl_secs: 60,
            poll_interval_ms: 100,
            poll_attempts,
            max_jitter_ms: 0,
        }
    }

    fn flight(backend: Arc<dyn Cache>, poll_attempts: usize) -> SingleFlight {
        SingleFlight::new(ChunkedCache::new(backend, 4), config(poll_attempts), TTL)
    }

    struct FailingCache;

    #[async_trait]
    impl Cache for FailingCache {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Err(SchemalessError::cache("connection refused"))
        }

        async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<()> {
            Err(SchemalessError::cache("connection refused"))
        }

        async fn delete(&self, _key: &str) -> Result<()> {
            Err(SchemalessError::cache("connection refused"))
        }
    }

    #[tokio::test]
    async fn generates_once_then_serves_cache() {
        let backend = Arc::new(MemoryCache::new());
        let flight = flight(backend.clone(), 3);
        let calls = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();

        for _ in 0..2 {
            let calls = calls.clone();
            let value = flight
                .run("users-abc", &token, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(b"{\"id\": \"$key\"}".to_vec())
                })
                .await
                .expect("template");
            assert_eq!(value, b"{\"id\": \"$key\"}".to_vec());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(backend.get("users-abc-started").await.expect("get").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_in_flight_result() {
        let backend = Arc::new(MemoryCache::new());
        backend
            .set("k-started", LOCK_VALUE, Duration::from_secs(60))
            .await
            .expect("lock");
        let writer = backend.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            writer.set("k", b"done", TTL).await.expect("result");
        });

        let value = flight(backend, 10)
            .run("k", &CancellationToken::new(), || async {
                Err(SchemalessError::internal("must not generate"))
            })
            .await
            .expect("result from other caller");

        handle.await.expect("writer");
        assert_eq!(value, b"done".to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn generates_after_poll_timeout() {
        let backend = Arc::new(MemoryCache::new());
        backend
            .set("k-started", LOCK_VALUE, Duration::from_secs(60))
            .await
            .expect("lock");

        let value = flight(backend.clone(), 2)
            .run("k", &CancellationToken::new(), || async { Ok(b"mine".to_vec()) })
            .await
            .expect("generated locally");

        assert_eq!(value, b"mine".to_vec());
        assert_eq!(backend.get("k").await.expect("get"), Some(b"mine".to_vec()));
    }

    #[tokio::test]
    async fn cache_outage_degrades_to_generation() {
        let value = flight(Arc::new(FailingCache), 3)
            .run("k", &CancellationToken::new(), || async { Ok(b"fresh".to_vec()) })
            .await
            .expect("generation still runs");
        assert_eq!(value, b"fresh".to_vec());
    }

    #[tokio::test]
    async fn failed_generation_releases_lock() {
        let backend = Arc::new(MemoryCache::new());
        let err = flight(backend.clone(), 3)
            .run("k", &CancellationToken::new(), || async {
                Err(SchemalessError::generation("exhausted"))
            })
            .await
            .expect_err("generation failed");

        assert_eq!(err.category().as_str(), "GENERATION_FAILED");
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_generation() {
        let token = CancellationToken::new();
        token.cancel();
        let err = flight(Arc::new(MemoryCache::new()), 3)
            .run("k", &token, || async { Ok(Vec::new()) })
            .await
            .expect_err("cancelled");
        assert!(matches!(err, SchemalessError::Cancelled));
    }
}

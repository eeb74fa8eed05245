//! Fixed-delay retries around the template generator.

use crate::config::GenerationConfig;
use crate::errors::{Result, SchemalessError};
use backon::{ConstantBuilder, Retryable};
use schemaless_async_utils::OrCancelExt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: usize,
    /// Delay between attempts
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&GenerationConfig::default())
    }
}

impl From<&GenerationConfig> for RetryConfig {
    fn from(cfg: &GenerationConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            delay: cfg.retry_delay(),
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// runs out of attempts. The whole loop, sleeps included, stops as soon as
/// `token` is cancelled.
pub async fn retry_fixed<F, Fut, T>(
    operation: F,
    config: &RetryConfig,
    token: &CancellationToken,
) -> Result<T>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T>> + Send,
    T: Send,
{
    // backon counts retries, not attempts
    let backoff = ConstantBuilder::default()
        .with_delay(config.delay)
        .with_max_times(config.max_attempts.saturating_sub(1));

    let result = operation
        .retry(backoff)
        .when(SchemalessError::is_retryable)
        .notify(|err: &SchemalessError, delay: Duration| {
            tracing::warn!(
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "template generation failed, retrying"
            );
        })
        .or_cancel(token)
        .await?;

    result.inspect_err(|err| {
        if err.is_retryable() {
            tracing::error!(
                error = %err,
                attempts = config.max_attempts,
                "template generation failed after all attempts"
            );
        }
    })
}

//! Cancellation-aware async helpers.
//!
//! Everything here races work against a tokio `CancellationToken` so a
//! cancelled translation stops sleeping, polling and waiting on external
//! calls promptly.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Returned when the token fired before the work finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Extension trait for making futures cancellable.
#[async_trait]
pub trait OrCancelExt: Sized {
    type Output;

    /// Race this future against the cancellation token.
    ///
    /// Returns `Ok(output)` if the future completes first, or
    /// `Err(Cancelled)` if the token is (or already was) cancelled.
    async fn or_cancel(self, token: &CancellationToken) -> Result<Self::Output, Cancelled>;
}

#[async_trait]
impl<F> OrCancelExt for F
where
    F: Future + Send,
    F::Output: Send,
{
    type Output = F::Output;

    async fn or_cancel(self, token: &CancellationToken) -> Result<Self::Output, Cancelled> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Cancelled),
            res = self => Ok(res),
        }
    }
}

/// Sleep for `duration` unless the token fires first.
///
/// A zero duration returns immediately without yielding.
pub async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> Result<(), Cancelled> {
    if token.is_cancelled() {
        return Err(Cancelled);
    }
    if duration.is_zero() {
        return Ok(());
    }

    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = token.cancelled() => Err(Cancelled),
    }
}

/// Probe `probe` up to `attempts` times, sleeping `interval` between probes.
///
/// Returns `Ok(Some(value))` on the first probe that yields a value and
/// `Ok(None)` once the attempts are used up.
pub async fn poll_with_interval<F, Fut, T>(
    interval: Duration,
    attempts: usize,
    token: &CancellationToken,
    mut probe: F,
) -> Result<Option<T>, Cancelled>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for attempt in 0..attempts {
        if attempt > 0 {
            sleep_or_cancel(interval, token).await?;
        }
        if token.is_cancelled() {
            return Err(Cancelled);
        }
        if let Some(value) = probe().await {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

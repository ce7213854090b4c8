use std::future::Future;
use std::time::Duration;

use tokio_retry::Retry;
use tracing::warn;

use crate::error::Error;

/// Two fixed retry schedules, carried over byte-for-byte from
/// `getRetryStrategy`: a "slow" ladder for queries that can
/// tolerate waiting out a database failover (2s, 4s, 8s, 16s, 32s) and a
/// "fast" ladder for latency-sensitive lookups on the dispatch hot path
/// (250ms, 500ms).
fn slow_schedule() -> Vec<Duration> {
    [2, 4, 8, 16, 32].into_iter().map(Duration::from_secs).collect()
}

fn fast_schedule() -> Vec<Duration> {
    [250, 500].into_iter().map(Duration::from_millis).collect()
}

async fn with_schedule<F, Fut, T>(schedule: Vec<Duration>, label: &str, mut op: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let attempt = std::sync::atomic::AtomicU32::new(0);
    Retry::spawn(schedule, || {
        let n = attempt.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let fut = op();
        async move {
            fut.await.map_err(|e| {
                warn!(error = %e, %label, attempt = n, "retry attempt failed");
                e
            })
        }
    })
    .await
}

/// Retries a fallible database operation on the "slow" schedule (bulk
/// queries, migrations, scheduled sweeps).
pub async fn with_slow_retry<F, Fut, T>(label: &str, op: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    with_schedule(slow_schedule(), label, op).await
}

/// Retries a fallible database operation on the "fast" schedule (per-message
/// dispatch-hot-path lookups).
pub async fn with_fast_retry<F, Fut, T>(label: &str, op: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    with_schedule(fast_schedule(), label, op).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry() {
        let calls = AtomicU32::new(0);
        let result = with_fast_retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Error>(42)
        })
        .await;
        assert_eq!(result.expect("ok"), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_fast_retry("test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 1 {
                Err(Error::Internal("transient".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.expect("ok"), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausts_schedule_and_returns_last_error() {
        let result = with_fast_retry("test", || async { Err::<i32, _>(Error::Internal("down".into())) }).await;
        assert!(result.is_err());
    }
}

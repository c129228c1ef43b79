//! Shared HTTP plumbing: client construction and the retry loop used by every
//! upstream client.
//!
//! Retry strategy:
//! - HTTP 429 or 5xx → retry with exponential backoff
//! - HTTP 401/403 → `AuthExpired`, never retried
//! - other 4xx → fail immediately
//! - network error → retry

use std::future::Future;
use std::time::Duration;

use crate::config::SyncOptions;
use crate::error::SyncError;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_options(options: &SyncOptions) -> Self {
        RetryPolicy {
            max_retries: options.max_retries,
            base_delay: Duration::from_millis(options.retry_base_ms),
        }
    }

    /// 1x, 2x, 4x ... the base delay, capped at 32x.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << attempt.saturating_sub(1).min(5))
    }
}

pub fn build_client(timeout_seconds: u64) -> Result<reqwest::Client, SyncError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds.max(1)))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| SyncError::Config(crate::unpack_error(&e)))
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// policy is exhausted.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay(attempt);
                tracing::warn!(
                    error = %e,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "{} failed, retrying",
                    what
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Sends the request built by `build`, retrying transient failures, and
/// returns the successful response.
pub async fn send_with_retry<F>(
    service: &str,
    policy: RetryPolicy,
    build: F,
) -> Result<reqwest::Response, SyncError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let build = &build;
    with_retry(policy, service, move || async move {
        let response = build().send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SyncError::from_status(service, status, &body))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let p = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(p.delay(1), Duration::from_millis(100));
        assert_eq!(p.delay(2), Duration::from_millis(200));
        assert_eq!(p.delay(3), Duration::from_millis(400));
        assert_eq!(p.delay(20), Duration::from_millis(3200));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(fast(), "fetch", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(SyncError::TransientFetch("503".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry(fast(), "fetch", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::TransientFetch("timeout".into()))
        })
        .await;
        assert!(matches!(result, Err(SyncError::TransientFetch(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_auth_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry(fast(), "fetch", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SyncError::auth_expired("weread", "-2012"))
        })
        .await;
        assert!(matches!(result, Err(SyncError::AuthExpired { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}

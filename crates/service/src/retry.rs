use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::errors::{AccessError, RepoError};
use crate::metrics;

/// Errors that know whether another attempt can help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for AccessError {
    fn is_retryable(&self) -> bool {
        AccessError::is_retryable(self)
    }
}

/// Exponential backoff for idempotent storage reads.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
    enabled: bool,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        backoff_base: Duration,
        backoff_max: Duration,
        enabled: bool,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
            backoff_max,
            enabled,
        }
    }

    pub fn from_config(cfg: &configs::RetryConfig) -> Self {
        Self::new(
            cfg.max_attempts,
            Duration::from_millis(cfg.backoff_base_ms),
            Duration::from_millis(cfg.backoff_max_ms),
            cfg.enabled,
        )
    }

    /// Single attempt, no waiting.
    pub fn disabled() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO, false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn max_attempts(&self) -> u32 {
        if self.enabled {
            self.max_attempts
        } else {
            1
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2_u32.saturating_pow(attempt - 1);
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }

    pub async fn wait_before_retry(&self, attempt: u32) {
        if !self.enabled || attempt == 0 {
            return;
        }
        let backoff = self.backoff(attempt);
        debug!("Retrying in {:?} (attempt {})", backoff, attempt);
        sleep(backoff).await;
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(50), Duration::from_millis(1000), true)
    }
}

pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let attempts = policy.max_attempts();
    let mut attempt = 0;
    loop {
        if attempt > 0 {
            metrics::STORAGE_RETRIES_TOTAL.inc();
            policy.wait_before_retry(attempt).await;
        }
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("Operation succeeded after {} retries", attempt);
                }
                return Ok(result);
            }
            Err(error) if error.is_retryable() && attempt + 1 < attempts => {
                warn!("Operation failed on attempt {}: {}", attempt + 1, error);
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

/// Idempotent repository read under `policy`, mapped into [`AccessError`].
pub async fn retry_read<T, F, Fut>(policy: &RetryPolicy, read: F) -> Result<T, AccessError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, RepoError>>,
{
    let read = &read;
    retry_with_policy(policy, move || async move { read().await.map_err(AccessError::from) }).await
}

/// Bound `fut` by `limit`, surfacing [`AccessError::Timeout`].
///
/// ```
/// use std::time::Duration;
/// use service::retry::with_timeout;
/// use service::AccessError;
///
/// let slow = async {
///     tokio::time::sleep(Duration::from_millis(50)).await;
///     Ok::<_, AccessError>(())
/// };
/// let res = tokio_test::block_on(with_timeout(Duration::from_millis(1), slow));
/// assert!(matches!(res, Err(AccessError::Timeout)));
/// ```
pub async fn with_timeout<T, Fut>(limit: Duration, fut: Fut) -> Result<T, AccessError>
where
    Fut: Future<Output = Result<T, AccessError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => {
            warn!(timeout_ms = limit.as_millis() as u64, "request_timeout");
            Err(AccessError::Timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_retry_policy_success_first_try() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(100), true);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_policy(&policy, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<i32, AccessError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_policy_success_after_retries() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(10), true);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_policy(&policy, || {
            let counter = counter_clone.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(AccessError::StorageUnavailable("temporary failure".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_policy_max_attempts_reached() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(10), true);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_policy(&policy, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, AccessError>(AccessError::StorageUnavailable("always fails".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(AccessError::StorageUnavailable(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_fast() {
        let policy = RetryPolicy::default();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_policy(&policy, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, AccessError>(AccessError::InviteExhausted)
            }
        })
        .await;

        assert!(matches!(result, Err(AccessError::InviteExhausted)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_policy_disabled() {
        let policy = RetryPolicy::disabled();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_policy(&policy, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, AccessError>(AccessError::StorageUnavailable("down".into()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::new(10, Duration::from_millis(50), Duration::from_millis(300), true);
        assert_eq!(policy.backoff(1), Duration::from_millis(50));
        assert_eq!(policy.backoff(2), Duration::from_millis(100));
        assert_eq!(policy.backoff(3), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(300));
        assert_eq!(policy.backoff(30), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn timeout_surfaces_timeout_error() {
        let res: Result<(), AccessError> = with_timeout(Duration::from_millis(5), async {
            sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;
        assert!(matches!(res, Err(AccessError::Timeout)));
    }
}

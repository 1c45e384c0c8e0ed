//! Retry policy with exponential backoff for transient API failures
//!
//! One initial attempt is followed by up to `max_retries` retries. The delay
//! before retry `n` (1-indexed) is `base_delay * multiplier^(n-1)`, capped at
//! `max_delay`, with optional jitter.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{ApiError, ClientError, RetryableError};

/// Retry policy with exponential backoff support
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy allowing `max_retries` retries after the first attempt
    pub fn new(max_retries: u32, config: RetryConfig) -> Self {
        Self {
            max_retries,
            config,
        }
    }

    /// Create a policy with default configuration (5 retries, 1s base, 60s cap)
    pub fn with_defaults() -> Self {
        Self::new(5, RetryConfig::default())
    }

    /// Execute an async attempt with retry logic
    ///
    /// The closure receives the 1-indexed attempt number. Permanent errors
    /// surface immediately; transient errors are retried until the retry
    /// budget runs out.
    ///
    /// # Returns
    ///
    /// The attempt's value together with the number of attempts made, or a
    /// [`ClientError`] carrying the attempt count and last cause
    pub async fn execute<F, Fut, T>(&self, mut attempt_fn: F) -> Result<(T, u32), ClientError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 1u32;

        loop {
            match attempt_fn(attempt).await {
                Ok(value) => return Ok((value, attempt)),
                Err(err) if !err.is_retryable() => {
                    debug!(attempt, error = %err, "Permanent error, not retrying");
                    return Err(ClientError::Permanent {
                        attempts: attempt,
                        source: err,
                    });
                }
                Err(err) => {
                    let retry = attempt;
                    if retry > self.max_retries {
                        warn!(
                            attempts = attempt,
                            max_retries = self.max_retries,
                            error = %err,
                            "Max retries exhausted"
                        );
                        return Err(ClientError::RetriesExhausted {
                            attempts: attempt,
                            last: err,
                        });
                    }

                    let backoff = self.calculate_backoff(retry);
                    if let ApiError::RateLimited(retry_after) = &err {
                        debug!(
                            retry_after_secs = retry_after,
                            backoff_ms = backoff.as_millis() as u64,
                            "Upstream asked to slow down"
                        );
                    }
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Retrying after transient error"
                    );

                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Calculate the delay before retry `retry` (1-indexed)
    ///
    /// Uses exponential backoff: base_delay * multiplier^(retry - 1)
    /// Capped at max_delay with optional jitter
    pub fn calculate_backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base =
            self.config.base_delay_secs as f64 * self.config.backoff_multiplier.powi(exponent);
        let capped = base.min(self.config.max_delay_secs as f64);

        let delay = if self.config.jitter {
            // 50-100% of the computed backoff
            let jitter = rand::thread_rng().gen_range(0.5..1.0);
            capped * jitter
        } else {
            capped
        };

        Duration::from_secs_f64(delay.max(0.0))
    }

    /// Retries allowed after the initial attempt
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Get the retry configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn instant_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_retries,
            RetryConfig {
                base_delay_secs: 0,
                max_delay_secs: 0,
                backoff_multiplier: 2.0,
                jitter: false,
            },
        )
    }

    // Test 1: Success on first attempt returns immediately
    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let policy = instant_policy(3);
        let call_count = Arc::new(AtomicU32::new(0));

        let result = policy
            .execute(|_| {
                let count = call_count.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ApiError>("success")
                }
            })
            .await;

        assert_eq!(result.unwrap(), ("success", 1));
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    // Test 2: Retries on transient error and eventually succeeds
    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failure() {
        let policy = instant_policy(3);

        let result = policy
            .execute(|attempt| async move {
                if attempt < 3 {
                    Err(ApiError::NetworkTimeout)
                } else {
                    Ok("success")
                }
            })
            .await;

        assert_eq!(result.unwrap(), ("success", 3));
    }

    // Test 3: Gives up after max retries with the last cause
    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let policy = instant_policy(2);
        let call_count = Arc::new(AtomicU32::new(0));

        let result: Result<((), u32), ClientError> = policy
            .execute(|_| {
                let count = call_count.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::ServerError(503))
                }
            })
            .await;

        assert_eq!(
            result.unwrap_err(),
            ClientError::RetriesExhausted {
                attempts: 3,
                last: ApiError::ServerError(503),
            }
        );
        // Initial attempt + max_retries
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    // Test 4: Permanent error returns immediately
    #[tokio::test]
    async fn test_permanent_error_returns_immediately() {
        let policy = instant_policy(5);
        let call_count = Arc::new(AtomicU32::new(0));

        let result: Result<((), u32), ClientError> = policy
            .execute(|_| {
                let count = call_count.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::ClientStatus {
                        status: 404,
                        body: "not found".to_string(),
                    })
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(ClientError::Permanent { attempts: 1, .. })
        ));
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    // Test 5: Backoff sequence doubles from the base delay
    #[test]
    fn test_backoff_sequence() {
        let policy = RetryPolicy::with_defaults();

        let delays: Vec<u64> = (1..=5)
            .map(|n| policy.calculate_backoff(n).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
    }

    // Test 6: Backoff is capped at max_delay
    #[test]
    fn test_backoff_capped_at_max() {
        let policy = RetryPolicy::with_defaults();

        // 2^6 = 64, capped at 60
        assert_eq!(policy.calculate_backoff(7), Duration::from_secs(60));
        assert_eq!(policy.calculate_backoff(40), Duration::from_secs(60));
    }

    // Test 7: Jitter reduces backoff to 50-100% range
    #[test]
    fn test_jitter_within_range() {
        let policy = RetryPolicy::new(
            3,
            RetryConfig {
                base_delay_secs: 10,
                max_delay_secs: 300,
                backoff_multiplier: 2.0,
                jitter: true,
            },
        );

        for _ in 0..100 {
            let backoff = policy.calculate_backoff(1);
            assert!(
                backoff >= Duration::from_secs(5) && backoff <= Duration::from_secs(10),
                "Backoff {:?} should be between 5-10 seconds",
                backoff
            );
        }
    }

    // Test 8: Rate limited and request timeout responses are retried
    #[tokio::test]
    async fn test_rate_limited_and_408_are_retried() {
        let policy = instant_policy(2);

        let result = policy
            .execute(|attempt| async move {
                match attempt {
                    1 => Err(ApiError::RateLimited(30)),
                    2 => Err(ApiError::RequestTimeout),
                    _ => Ok("ok"),
                }
            })
            .await;

        assert_eq!(result.unwrap(), ("ok", 3));
    }

    // Test 9: Zero max_retries still allows the initial attempt
    #[tokio::test]
    async fn test_zero_max_retries() {
        let policy = instant_policy(0);

        let result: Result<((), u32), ClientError> = policy
            .execute(|_| async { Err(ApiError::ConnectionRefused) })
            .await;

        assert_eq!(result.unwrap_err().attempts(), 1);
    }

    // Test 10: Sleeps follow the backoff schedule
    #[tokio::test(start_paused = true)]
    async fn test_sleeps_follow_schedule() {
        let policy = RetryPolicy::with_defaults();
        let start = tokio::time::Instant::now();

        let result = policy
            .execute(|attempt| async move {
                if attempt <= 3 {
                    Err(ApiError::ServerError(502))
                } else {
                    Ok(())
                }
            })
            .await;

        assert_eq!(result.unwrap().1, 4);
        // 1 + 2 + 4 seconds
        assert!(start.elapsed() >= Duration::from_secs(7));
        assert!(start.elapsed() < Duration::from_secs(8));
    }
}

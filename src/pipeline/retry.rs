//! Bounded retries with exponential backoff for collaborator calls.

use crate::defaults;
use crate::error::{AvatarError, Result};
use std::future::Future;
use std::time::Duration;

/// How often, and how patiently, a failed request is repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. Zero behaves like one.
    pub max_attempts: u32,
    /// Delay before the first retry (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_ATTEMPTS,
            base_delay: Duration::from_millis(defaults::RETRY_BACKOFF_MS),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay)
    }

    /// Runs `call` until it succeeds, fails with a non-retryable error, or
    /// runs out of attempts. Each attempt is bounded by `timeout`, which
    /// surfaces as `AvatarError::Timeout`.
    pub async fn run<T, F, Fut>(&self, service: &'static str, timeout: Duration, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(AvatarError::Timeout {
                    service,
                    after: timeout,
                }),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    tracing::warn!(
                        service,
                        attempt,
                        max_attempts,
                        delay = ?delay,
                        error = %e,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(service, attempt, error = %e, "Request failed");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(3));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transport_errors_then_succeeds() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result = RetryPolicy::default()
            .run("stt", Duration::from_secs(30), || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AvatarError::transport("stt", "connection reset"))
                } else {
                    Ok("hello")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "hello");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 500ms + 1s of backoff.
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = RetryPolicy::default()
            .run("llm", Duration::from_secs(30), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AvatarError::transport("llm", "HTTP 503"))
            })
            .await;

        assert!(matches!(result, Err(AvatarError::Transport { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_are_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = RetryPolicy::default()
            .run("tts", Duration::from_secs(5), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                std::future::pending().await
            })
            .await;

        match result {
            Err(AvatarError::Timeout { service, after }) => {
                assert_eq!(service, "tts");
                assert_eq!(after, Duration::from_secs(5));
            }
            other => panic!("Expected Timeout, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_immediately() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = RetryPolicy::default()
            .run("tts", Duration::from_secs(5), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AvatarError::UnsupportedFormat {
                    message: "8 bits".to_string(),
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_attempts_still_calls_once() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };

        let _: Result<()> = policy
            .run("stt", Duration::from_secs(1), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AvatarError::transport("stt", "x"))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

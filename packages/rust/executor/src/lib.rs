//! Retry, backoff, and timeout execution around unreliable async calls.
//!
//! Two independent facilities, composed by nesting:
//! - [`with_timeout`] - bounds one attempt by wall-clock time and turns an
//!   overrun into [`TubeWikiError::Timeout`]
//! - [`retry_with_backoff`] - re-runs an operation on failures whose
//!   [`ErrorKind`] the caller marked retryable, sleeping an exponentially
//!   growing delay between attempts
//!
//! When a [`RetryPolicy`] carries an `attempt_timeout`, the retry loop wraps
//! each attempt in [`with_timeout`], so an overrun is retried like any other
//! transient failure (provided `ErrorKind::Timeout` is in the retryable set).

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, warn};

use tubewiki_shared::{ErrorKind, Result, RetryConfig, TubeWikiError};

/// Failure kinds caused by the transport rather than the request.
pub const TRANSIENT: &[ErrorKind] = &[ErrorKind::Network, ErrorKind::Timeout];

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Retry schedule for one call site.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves as one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after every failed attempt.
    pub backoff_factor: f64,
    /// Per-attempt wall-clock budget.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            attempt_timeout: None,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_factor: config.backoff_factor,
            attempt_timeout: config.attempt_timeout_ms.map(Duration::from_millis),
        }
    }
}

impl RetryPolicy {
    /// A policy that runs the operation exactly once.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set the per-attempt timeout.
    pub fn with_attempt_timeout(mut self, limit: Duration) -> Self {
        self.attempt_timeout = Some(limit);
        self
    }

    /// Delay slept before retry number `retry_index` (0-based).
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let mut delay = self.initial_delay.min(self.max_delay);
        for _ in 0..retry_index {
            delay = self.next_delay(delay);
        }
        delay
    }

    fn next_delay(&self, current: Duration) -> Duration {
        Duration::try_from_secs_f64(current.as_secs_f64() * self.backoff_factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

// ---------------------------------------------------------------------------
// Timeout
// ---------------------------------------------------------------------------

/// Run `future` with a hard wall-clock limit.
pub async fn with_timeout<T, F>(operation: &str, limit: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                operation,
                timeout_ms = limit.as_millis() as u64,
                "operation timed out"
            );
            Err(TubeWikiError::timeout(operation, limit))
        }
    }
}

// ---------------------------------------------------------------------------
// Retry loop
// ---------------------------------------------------------------------------

/// Execute `op` under `policy`, retrying failures whose kind is in
/// `retryable`.
///
/// Non-retryable failures propagate immediately. After the last attempt the
/// last failure propagates unchanged.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    retryable: &[ErrorKind],
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.attempts();
    let mut delay = policy.delay_for(0);
    let mut attempt: u32 = 1;

    loop {
        let started = Instant::now();
        let result = match policy.attempt_timeout {
            Some(limit) => with_timeout(operation, limit, op()).await,
            None => op().await,
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let err = match result {
            Ok(value) => {
                debug!(operation, attempt, elapsed_ms, "attempt succeeded");
                return Ok(value);
            }
            Err(err) => err,
        };

        let kind = err.kind();
        if !retryable.contains(&kind) {
            warn!(
                operation,
                attempt,
                elapsed_ms,
                kind = %kind,
                error = %err,
                "attempt failed with non-retryable error"
            );
            return Err(err);
        }

        if attempt >= max_attempts {
            error!(
                operation,
                attempt,
                max_attempts,
                elapsed_ms,
                kind = %kind,
                error = %err,
                "all attempts failed"
            );
            return Err(err);
        }

        warn!(
            operation,
            attempt,
            max_attempts,
            elapsed_ms,
            delay_ms = delay.as_millis() as u64,
            kind = %kind,
            error = %err,
            "attempt failed, retrying"
        );

        tokio::time::sleep(delay).await;
        delay = policy.next_delay(delay);
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            attempt_timeout: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_two_failures_with_growing_delay() {
        let calls = AtomicU32::new(0);
        let seen = Mutex::new(Vec::new());
        let policy = fast_policy(3);

        let result = retry_with_backoff(&policy, "flaky", TRANSIENT, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            seen.lock().unwrap().push(Instant::now());
            async move {
                if n < 3 {
                    Err(TubeWikiError::Network(format!("reset #{n}")))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let seen = seen.lock().unwrap();
        let first_delay = seen[1] - seen[0];
        let second_delay = seen[2] - seen[1];
        assert!(first_delay >= policy.initial_delay);
        assert!(second_delay >= first_delay.mul_f64(policy.backoff_factor));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_failure_propagates_immediately() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = retry_with_backoff(&fast_policy(5), "parse", TRANSIENT, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TubeWikiError::invalid_source("https://example.com", "bad host")) }
        })
        .await;

        assert!(matches!(
            result,
            Err(TubeWikiError::InvalidSourceReference { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_returns_last_error() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = retry_with_backoff(&fast_policy(4), "down", TRANSIENT, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(TubeWikiError::Network(format!("attempt {n}"))) }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "network error: attempt 4");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn call_site_selects_retryable_kinds() {
        let calls = AtomicU32::new(0);
        let kinds = [ErrorKind::Generation];

        let result = retry_with_backoff(&fast_policy(3), "generate", &kinds, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n == 1 {
                    Err(TubeWikiError::Generation("rate limited".into()))
                } else {
                    Ok("text")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "text");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_timeout_is_retried() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy(2).with_attempt_timeout(Duration::from_secs(1));

        let result = retry_with_backoff(&policy, "slow", TRANSIENT, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n == 1 {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                }
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_not_retried_unless_selected() {
        let policy = fast_policy(3).with_attempt_timeout(Duration::from_millis(50));
        let calls = AtomicU32::new(0);

        let result: Result<()> =
            retry_with_backoff(&policy, "slow", &[ErrorKind::Network], || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(TubeWikiError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn standalone_timeout() {
        let fast = with_timeout("fast", Duration::from_secs(1), async { Ok(5) }).await;
        assert_eq!(fast.unwrap(), 5);

        let slow: Result<()> = with_timeout("slow", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;
        let err = slow.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.to_string().contains("slow timed out after 10ms"));
    }

    #[test]
    fn delay_schedule_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            attempt_timeout: None,
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(5));
        assert_eq!(policy.delay_for(8), Duration::from_secs(5));
    }

    #[test]
    fn policy_from_config() {
        let config = RetryConfig {
            max_attempts: 4,
            initial_delay_ms: 250,
            max_delay_ms: 8_000,
            backoff_factor: 3.0,
            attempt_timeout_ms: Some(30_000),
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        assert_eq!(policy.attempt_timeout, Some(Duration::from_secs(30)));
        assert_eq!(RetryPolicy::once().attempts(), 1);
    }
}

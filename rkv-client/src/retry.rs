//! # Retry Executor
//!
//! Purpose: Run one remote operation with bounded exponential backoff and
//! full jitter, so short network blips never reach the caller.
//!
//! ## Design Principles
//! 1. **Higher-Order Wrapper**: The executor takes a closure producing a fresh
//!    future per attempt; no hidden control flow around call sites.
//! 2. **Classifier Driven**: Only `ClientError::is_transient` failures retry.
//! 3. **Sequential Attempts**: Attempts of one call never overlap.
//! 4. **Full Jitter**: Each sleep is uniform in `[0, factor * base^k]`.
//!
//! ## Backoff Example (factor 0.1s, base 2)
//!
//! ```text
//! attempt 1 fails -> sleep U(0, 0.1s)
//! attempt 2 fails -> sleep U(0, 0.2s)
//! attempt 3 fails -> error returned (max_attempts = 3)
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use rkv_common::{saturating_secs, RedisSettings};
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};

/// Exponential base used by the backoff.
pub const DEFAULT_BACKOFF_BASE: f64 = 2.0;

/// Backoff and deadline parameters for one executor.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (always at least 1).
    pub max_attempts: u32,
    pub base: f64,
    /// Delay before the first retry, before jitter.
    pub factor: Duration,
    /// Cap on a single computed delay.
    pub max_delay: Duration,
    /// Whether an attempt that hit its deadline counts as transient.
    pub retry_on_timeout: bool,
    /// Deadline for a single attempt.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from_settings(&RedisSettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RedisSettings) -> Self {
        RetryPolicy {
            max_attempts: settings.retry_attempts.max(1),
            base: DEFAULT_BACKOFF_BASE,
            factor: saturating_secs(settings.retry_delay),
            max_delay: saturating_secs(settings.retry_max_delay),
            retry_on_timeout: settings.retry_on_timeout,
            attempt_timeout: settings.socket_timeout,
        }
    }

    /// A policy that runs the operation exactly once.
    pub fn no_retry() -> Self {
        RetryPolicy {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Computed (pre-jitter) delay after `retries` failed retries so far.
    ///
    /// `retries` starts at 0 for the sleep after the first failed attempt.
    pub fn delay_for_attempt(&self, retries: u32) -> Duration {
        let exponent = i32::try_from(retries).unwrap_or(i32::MAX);
        let secs = self.factor.as_secs_f64() * self.base.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_nan() || capped <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    /// Samples the actual sleep uniformly in `[0, delay_for_attempt(retries)]`.
    pub fn jittered_delay<R: Rng>(&self, retries: u32, rng: &mut R) -> Duration {
        let ceiling = self.delay_for_attempt(retries).as_secs_f64();
        if ceiling == 0.0 {
            return Duration::ZERO;
        }
        saturating_secs(rng.gen_range(0.0..=ceiling))
    }

    /// Returns true when `err` on attempt number `attempt` (1-based) should
    /// be followed by another attempt.
    pub fn should_retry(&self, err: &ClientError, attempt: u32) -> bool {
        if attempt >= self.max_attempts || !err.is_transient() {
            return false;
        }
        !matches!(err, ClientError::Timeout(_)) || self.retry_on_timeout
    }
}

/// Runs operations under a `RetryPolicy`.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        RetryExecutor { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Executes `operation` with the policy's per-attempt deadline.
    pub async fn execute<T, F, Fut>(&self, op: &str, key: &str, operation: F) -> ClientResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        self.execute_within(op, key, self.policy.attempt_timeout, operation)
            .await
    }

    /// Executes `operation` with an explicit per-attempt deadline.
    ///
    /// **Input**: `op` name and `key` for logs, `deadline` per attempt (`None` waits
    /// forever), and a closure producing one attempt.
    /// **Output**: the first success, or the last error.
    ///
    /// **Logic**:
    /// 1. Run one attempt, bounded by `deadline`.
    /// 2. On a retryable failure, sleep a jittered backoff and go again.
    /// 3. Otherwise return the outcome as-is.
    pub async fn execute_within<T, F, Fut>(
        &self,
        op: &str,
        key: &str,
        deadline: Option<Duration>,
        mut operation: F,
    ) -> ClientResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let outcome = match deadline {
                Some(limit) => match tokio::time::timeout(limit, operation()).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ClientError::Timeout(limit)),
                },
                None => operation().await,
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(op, key, attempt, "operation recovered after retry");
                    }
                    return Ok(value);
                }
                Err(err) if self.policy.should_retry(&err, attempt) => {
                    let delay = self.sample_delay(attempt - 1);
                    warn!(
                        op,
                        key,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn sample_delay(&self, retries: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.policy.jittered_delay(retries, &mut rng)
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        RetryExecutor::new(RetryPolicy::default())
    }
}

//! Retry policies, retry filters and the retry executor.
//!
//! # Overview
//!
//! - [`RetryPolicy`]: attempt budget, backoff settings and retry filters
//! - [`Filter`]: decides whether one failed attempt is retried
//! - [`ExponentialBackoff`]: iterator that yields sleep durations with jitter
//! - [`execute`]: runs an attempt function under a policy
//!
//! # Filters
//!
//! Filters run in order and the first one that does not abstain decides. Two
//! filters always run before any caller-supplied ones:
//!
//! 1. [`retryable_error_filter`]: honours the retry hint the error's producer
//!    attached (pool exhaustion is always retryable)
//! 2. [`context_error_filter`]: never retries a cancelled or expired context
//!
//! If every filter abstains the error is returned. The default policy makes a
//! single attempt, so nothing is retried unless a caller asks for it.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::{CallContext, ClientError};

/// Default configuration values.
pub mod defaults {
    use std::time::Duration;

    /// Default number of attempts, including the first one.
    pub const ATTEMPTS: u32 = 1;

    /// Default initial delay before the first retry.
    pub const BASE_DELAY: Duration = Duration::from_millis(100);

    /// Default multiplier for exponential backoff.
    pub const MULTIPLIER: f64 = 2.0;

    /// Default jitter factor (0.2 means +/- 20%).
    pub const JITTER: f64 = 0.2;

    /// Default maximum delay between retries.
    pub const MAX_DELAY: Duration = Duration::from_secs(10);
}

/// Outcome of a retry filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Retry the call after the backoff delay.
    Retry,
    /// Return the error now.
    Stop,
    /// No opinion; ask the next filter.
    Abstain,
}

/// A retry filter: `(error, attempt) -> Decision`. `attempt` starts at 1.
pub type Filter = Arc<dyn Fn(&ClientError, u32) -> Decision + Send + Sync>;

/// Retries errors whose producer marked them retryable, stops on errors
/// marked non-retryable, abstains otherwise.
pub fn retryable_error_filter(error: &ClientError, _attempt: u32) -> Decision {
    match error.retryable() {
        Some(true) => Decision::Retry,
        Some(false) => Decision::Stop,
        None => Decision::Abstain,
    }
}

/// Never retries cancelled or expired contexts.
pub fn context_error_filter(error: &ClientError, _attempt: u32) -> Decision {
    if error.is_context_error() {
        Decision::Stop
    } else {
        Decision::Abstain
    }
}

/// Retries every error that reaches it.
///
/// Useful as the last filter of a policy for idempotent methods.
pub fn retry_all_filter(_error: &ClientError, _attempt: u32) -> Decision {
    Decision::Retry
}

const DEFAULT_FILTERS: [fn(&ClientError, u32) -> Decision; 2] =
    [retryable_error_filter, context_error_filter];

/// Configuration for retry behavior.
///
/// # Example
///
/// ```
/// use rpcweave_client::{RetryPolicy, retry_all_filter};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// // One attempt, never retries
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.attempts, 1);
///
/// // Up to three attempts for anything the default filters do not stop
/// let policy = RetryPolicy::new()
///     .attempts(3)
///     .base_delay(Duration::from_millis(10))
///     .filter(Arc::new(retry_all_filter));
/// ```
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub attempts: u32,

    /// Initial delay before the first retry.
    pub base_delay: Duration,

    /// Multiplier for exponential backoff. Should be >= 1.0.
    pub multiplier: f64,

    /// Jitter factor for randomizing delays. Value between 0.0 and 1.0.
    pub jitter: f64,

    /// Maximum delay between retries.
    pub max_delay: Duration,

    /// Caller-supplied filters, consulted after the default filters.
    filters: Vec<Filter>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("attempts", &self.attempts)
            .field("base_delay", &self.base_delay)
            .field("multiplier", &self.multiplier)
            .field("jitter", &self.jitter)
            .field("max_delay", &self.max_delay)
            .field("filters", &self.filters.len())
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: defaults::ATTEMPTS,
            base_delay: defaults::BASE_DELAY,
            multiplier: defaults::MULTIPLIER,
            jitter: defaults::JITTER,
            max_delay: defaults::MAX_DELAY,
            filters: Vec::new(),
        }
    }
}

impl RetryPolicy {
    /// Create a new RetryPolicy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of attempts, including the first one.
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Set the initial delay before the first retry.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set the jitter factor.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Append a filter after the ones already configured.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Replace the caller-supplied filters. The default filters still run first.
    pub fn filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters = filters;
        self
    }

    /// Validate the policy configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.attempts == 0 {
            return Err("attempts must be at least 1");
        }
        if self.base_delay > self.max_delay {
            return Err("base_delay must not exceed max_delay");
        }
        if self.multiplier < 1.0 {
            return Err("multiplier must be >= 1.0");
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err("jitter must be between 0.0 and 1.0");
        }
        Ok(())
    }

    /// Decide whether a failed attempt is retried.
    ///
    /// The default filters run first, then the caller-supplied ones; the first
    /// decision other than [`Decision::Abstain`] wins. If all abstain the
    /// answer is [`Decision::Stop`].
    pub fn decide(&self, error: &ClientError, attempt: u32) -> Decision {
        DEFAULT_FILTERS
            .iter()
            .map(|filter| filter(error, attempt))
            .chain(self.filters.iter().map(|filter| filter(error, attempt)))
            .find(|decision| *decision != Decision::Abstain)
            .unwrap_or(Decision::Stop)
    }

    /// Create an ExponentialBackoff iterator from this policy.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self)
    }
}

/// Exponential backoff with jitter.
///
/// The sequence follows `base * multiplier^n` with +/- jitter, clamped to the
/// policy's maximum delay.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    jitter: f64,
    multiplier: f64,
    max_delay_secs: f64,
    /// Current delay without jitter, stored as f64 to avoid rounding errors.
    current_delay_secs: f64,
}

impl ExponentialBackoff {
    /// Create a new ExponentialBackoff from a RetryPolicy.
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            jitter: policy.jitter,
            multiplier: policy.multiplier,
            max_delay_secs: policy.max_delay.as_secs_f64(),
            current_delay_secs: policy.base_delay.as_secs_f64(),
        }
    }

    /// Get the next delay duration, applying jitter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_delay_secs;

        // delay * (1 + jitter * random(-1, 1))
        let jittered = if self.jitter > 0.0 {
            let random_factor = rand::random::<f64>() * self.jitter * 2.0 - self.jitter;
            delay * (1.0 + random_factor)
        } else {
            delay
        };

        let clamped = jittered.min(self.max_delay_secs);
        self.current_delay_secs = (self.current_delay_secs * self.multiplier).min(self.max_delay_secs);

        Duration::from_secs_f64(clamped.max(0.0))
    }
}

/// Run `attempt` under `policy`.
///
/// Every attempt shares `ctx`, so retries never extend the deadline. The
/// backoff wait ends early when the context is cancelled or its deadline
/// passes; the last attempt's error is returned in that case. The error of
/// the final attempt is returned unchanged.
pub async fn execute<T, F, Fut>(
    ctx: &CallContext,
    policy: &RetryPolicy,
    mut attempt: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut backoff = policy.backoff();
    let mut attempt_number = 1;

    loop {
        let error = match attempt().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if attempt_number >= policy.attempts {
            return Err(error);
        }
        if policy.decide(&error, attempt_number) != Decision::Retry {
            return Err(error);
        }

        let delay = backoff.next_delay();
        tracing::debug!(
            error = %error,
            attempt = attempt_number,
            delay_ms = delay.as_millis(),
            "retrying after failed attempt"
        );

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            reason = ctx.done() => {
                tracing::debug!(%reason, "retry backoff interrupted");
                return Err(error);
            }
        }
        attempt_number += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContextError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_util::sync::CancellationToken;

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new()
            .attempts(attempts)
            .base_delay(Duration::from_millis(1))
            .jitter(0.0)
    }

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 1);
        assert_eq!(policy.base_delay, Duration::from_millis(100));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_retry_policy_validate() {
        assert!(RetryPolicy::new().attempts(0).validate().is_err());
        assert!(RetryPolicy::new().multiplier(0.5).validate().is_err());
        assert!(RetryPolicy::new().jitter(1.5).validate().is_err());
        assert!(
            RetryPolicy::new()
                .base_delay(Duration::from_secs(10))
                .max_delay(Duration::from_secs(1))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_default_filters_come_first() {
        // A caller filter that retries everything cannot override the
        // context filter.
        let policy = RetryPolicy::new().filter(Arc::new(retry_all_filter));
        assert_eq!(
            policy.decide(&ContextError::DeadlineExceeded.into(), 1),
            Decision::Stop
        );
        assert_eq!(policy.decide(&ClientError::transport("reset"), 1), Decision::Retry);

        let marked = ClientError::Transport {
            message: "reset".into(),
            retryable: Some(false),
        };
        assert_eq!(policy.decide(&marked, 1), Decision::Stop);
    }

    #[test]
    fn test_all_abstain_stops() {
        let policy = RetryPolicy::new().filter(Arc::new(|_: &ClientError, _: u32| Decision::Abstain));
        assert_eq!(policy.decide(&ClientError::transport("reset"), 1), Decision::Stop);
        assert_eq!(policy.decide(&ClientError::PoolExhausted, 1), Decision::Retry);
    }

    #[test]
    fn test_filter_sees_attempt_number() {
        let policy = RetryPolicy::new().filter(Arc::new(|_: &ClientError, attempt: u32| {
            if attempt < 2 { Decision::Retry } else { Decision::Stop }
        }));
        let err = ClientError::transport("reset");
        assert_eq!(policy.decide(&err, 1), Decision::Retry);
        assert_eq!(policy.decide(&err, 2), Decision::Stop);
    }

    #[test]
    fn test_exponential_backoff_no_jitter() {
        let policy = RetryPolicy::new()
            .base_delay(Duration::from_secs(1))
            .multiplier(2.0)
            .max_delay(Duration::from_secs(5))
            .jitter(0.0);
        let mut backoff = policy.backoff();

        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_backoff_with_jitter() {
        let policy = RetryPolicy::new()
            .base_delay(Duration::from_secs(1))
            .jitter(0.2);
        let delay = policy.backoff().next_delay();
        assert!(delay >= Duration::from_millis(800));
        assert!(delay <= Duration::from_millis(1200));
    }

    #[tokio::test]
    async fn test_single_attempt_returns_raw_error() {
        let calls = AtomicU32::new(0);
        let original = ClientError::retryable_transport("connection reset");

        let result: Result<(), _> = execute(&CallContext::new(), &RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            let err = original.clone();
            async move { Err(err) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap_err(), original);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = execute(&CallContext::new(), &fast_policy(5), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 { Err(ClientError::PoolExhausted) } else { Ok(n) }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = execute(&CallContext::new(), &fast_policy(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ClientError::PoolExhausted) }
        })
        .await;

        assert_eq!(result.unwrap_err(), ClientError::PoolExhausted);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unmarked_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = execute(&CallContext::new(), &fast_policy(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ClientError::application(500, "boom")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_wait_is_cancellable() {
        let token = CancellationToken::new();
        let ctx = CallContext::new().with_cancellation(token.clone());
        let policy = RetryPolicy::new()
            .attempts(3)
            .base_delay(Duration::from_secs(60))
            .max_delay(Duration::from_secs(60))
            .jitter(0.0);

        let calls = AtomicU32::new(0);
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let started = tokio::time::Instant::now();
        let result: Result<(), _> = execute(&ctx, &policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ClientError::PoolExhausted) }
        })
        .await;
        canceller.await.unwrap();

        assert_eq!(result.unwrap_err(), ClientError::PoolExhausted);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(60));
    }
}

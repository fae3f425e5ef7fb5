//! Parametrized retry-with-backoff shared by every call site that talks to an
//! unreliable collaborator.
//!
//! The same loop drives asset downloads, URL signing, and stage re-invocation;
//! each call site only differs in its [`RetryPolicy`]:
//!
//! | Call site | Attempts | Backoff |
//! |-----------|----------|---------|
//! | Asset download | 3 | linear, `attempt × 15s` |
//! | URL signing | 3 | fixed, `10s` |
//! | Stage re-run | `1 + retries` | fixed, `5s` |
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use ingest_core::retry::{Backoff, FailureType, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::new(3, Backoff::Linear { step: Duration::from_secs(15) });
//!
//! match policy.should_retry(FailureType::Transient, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         assert_eq!(delay, Duration::from_secs(15));
//!         assert_eq!(attempt, 2);
//!     }
//!     RetryDecision::DoNotRetry { reason } => panic!("unexpected: {reason}"),
//! }
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::download::DownloadError;

/// Default maximum download attempts (including the first).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default linear backoff step between download attempts.
pub const DEFAULT_LINEAR_STEP: Duration = Duration::from_secs(15);

/// Default signing attempts.
pub const DEFAULT_SIGN_ATTEMPTS: u32 = 3;

/// Default fixed delay between signing attempts.
pub const DEFAULT_SIGN_DELAY: Duration = Duration::from_secs(10);

/// Classification of a failure for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: connection reset, non-2xx status, stalled transfer, empty body.
    Transient,

    /// Failure that won't succeed regardless of retries.
    ///
    /// Examples: malformed URL, destination directory not writable.
    Permanent,

    /// The run is shutting down; never retried.
    Cancelled,
}

/// How long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `attempt × step`, so the wait grows with every failure.
    Linear {
        /// Delay added per failed attempt.
        step: Duration,
    },
    /// Same delay after every failure.
    Fixed {
        /// Delay between attempts.
        delay: Duration,
    },
}

impl Backoff {
    /// Returns the delay to wait after `attempt` (1-indexed) failed.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Self::Linear { step } => step.saturating_mul(attempt.max(1)),
            Self::Fixed { delay } => delay,
        }
    }
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Attempt budget plus delay function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,
    backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_ATTEMPTS,
            Backoff::Linear {
                step: DEFAULT_LINEAR_STEP,
            },
        )
    }
}

impl RetryPolicy {
    /// Creates a policy; `max_attempts` is clamped to at least one.
    #[must_use]
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Linear backoff: waits `attempt × step` after each failure.
    #[must_use]
    pub fn linear(max_attempts: u32, step: Duration) -> Self {
        Self::new(max_attempts, Backoff::Linear { step })
    }

    /// Fixed backoff: waits `delay` after each failure.
    #[must_use]
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::new(max_attempts, Backoff::Fixed { delay })
    }

    /// Policy used for the signing step when nothing else is configured.
    #[must_use]
    pub fn signing_default() -> Self {
        Self::fixed(DEFAULT_SIGN_ATTEMPTS, DEFAULT_SIGN_DELAY)
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the configured backoff.
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed.
    #[instrument(level = "trace", skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::Cancelled => {
                return RetryDecision::DoNotRetry {
                    reason: "shutdown requested".to_string(),
                };
            }
            FailureType::Transient => {}
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        RetryDecision::Retry {
            delay: self.backoff.delay_for(attempt),
            attempt: attempt + 1,
        }
    }
}

/// Final error of a retried operation together with how many attempts ran.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    /// Error from the last attempt.
    pub error: E,
    /// Number of attempts made (at least one).
    pub attempts: u32,
    /// True when the loop stopped because of a shutdown request.
    pub cancelled: bool,
}

/// Runs `operation` until it succeeds, the policy gives up, or `cancel` fires.
///
/// `operation` receives the 1-indexed attempt number. On success returns the
/// value and the number of attempts it took.
///
/// # Errors
///
/// Returns [`RetryExhausted`] with the last error when attempts run out, the
/// error is classified as permanent, or the run is cancelled.
pub async fn retry_with_backoff<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    classify: C,
    mut operation: F,
) -> Result<(T, u32), RetryExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> FailureType,
    E: Display,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        debug!(label, attempt, "attempting");

        let error = match operation(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(error) => error,
        };

        let failure_type = if cancel.is_cancelled() {
            FailureType::Cancelled
        } else {
            classify(&error)
        };

        match policy.should_retry(failure_type, attempt) {
            RetryDecision::Retry {
                delay,
                attempt: next_attempt,
            } => {
                info!(
                    label,
                    attempt = next_attempt,
                    max_attempts = policy.max_attempts(),
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "retrying"
                );
                tokio::select! {
                    () = cancel.cancelled() => {
                        return Err(RetryExhausted { error, attempts: attempt, cancelled: true });
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
            RetryDecision::DoNotRetry { reason } => {
                debug!(label, %reason, "not retrying");
                return Err(RetryExhausted {
                    error,
                    attempts: attempt,
                    cancelled: failure_type == FailureType::Cancelled,
                });
            }
        }
    }
}

/// Classifies a download error for the retry loop.
///
/// Every transfer-level failure is transient: the remedy for a reset
/// connection, an overloaded origin (any non-2xx), a stalled body, or an empty
/// body is the same full restart. Only failures that no retry can fix are
/// permanent.
#[must_use]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::Network { .. }
        | DownloadError::Timeout { .. }
        | DownloadError::Stalled { .. }
        | DownloadError::HttpStatus { .. }
        | DownloadError::EmptyBody { .. } => FailureType::Transient,
        DownloadError::Io { .. } | DownloadError::InvalidUrl { .. } => FailureType::Permanent,
        DownloadError::Cancelled { .. } => FailureType::Cancelled,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_retry_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(
            policy.backoff(),
            Backoff::Linear {
                step: Duration::from_secs(15)
            }
        );
    }

    #[test]
    fn test_retry_policy_max_attempts_minimum_is_one() {
        let policy = RetryPolicy::linear(0, Duration::from_secs(1));
        assert_eq!(policy.max_attempts(), 1);
    }

    #[test]
    fn test_linear_backoff_is_attempt_times_step() {
        let backoff = Backoff::Linear {
            step: Duration::from_secs(15),
        };
        assert_eq!(backoff.delay_for(1), Duration::from_secs(15));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(30));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(45));
    }

    #[test]
    fn test_fixed_backoff_is_constant() {
        let backoff = Backoff::Fixed {
            delay: Duration::from_secs(10),
        };
        assert_eq!(backoff.delay_for(1), backoff.delay_for(5));
    }

    #[test]
    fn test_should_retry_respects_max_attempts() {
        let policy = RetryPolicy::linear(3, Duration::from_secs(1));

        assert!(matches!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::Retry { attempt: 2, .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 2),
            RetryDecision::Retry { attempt: 3, .. }
        ));

        let decision = policy.should_retry(FailureType::Transient, 3);
        if let RetryDecision::DoNotRetry { reason } = decision {
            assert!(reason.contains("exhausted"));
        } else {
            panic!("Expected DoNotRetry, got {decision:?}");
        }
    }

    #[test]
    fn test_should_retry_permanent_and_cancelled_do_not_retry() {
        let policy = RetryPolicy::default();
        assert!(matches!(
            policy.should_retry(FailureType::Permanent, 1),
            RetryDecision::DoNotRetry { .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::Cancelled, 1),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_classify_transfer_failures_transient() {
        let url = "https://example.com/a.tif";
        assert_eq!(
            classify_error(&DownloadError::http_status(url, 404)),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&DownloadError::http_status(url, 503)),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&DownloadError::stalled(url, Duration::from_secs(1))),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&DownloadError::empty_body(url)),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&DownloadError::timeout(url)),
            FailureType::Transient
        );
    }

    #[test]
    fn test_classify_local_failures_permanent() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(
            classify_error(&DownloadError::io("/staging/a.tif", io_err)),
            FailureType::Permanent
        );
        assert_eq!(
            classify_error(&DownloadError::invalid_url("nope")),
            FailureType::Permanent
        );
        assert_eq!(
            classify_error(&DownloadError::cancelled("https://example.com")),
            FailureType::Cancelled
        );
    }

    #[tokio::test]
    async fn test_retry_with_backoff_succeeds_on_third_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1));
        let cancel = CancellationToken::new();

        let counter = Arc::clone(&calls);
        let result = retry_with_backoff(
            &policy,
            &cancel,
            "test",
            |_: &String| FailureType::Transient,
            move |attempt| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 {
                        Err(format!("attempt {attempt} failed"))
                    } else {
                        Ok("done")
                    }
                }
            },
        )
        .await;

        let (value, attempts) = result.unwrap();
        assert_eq!(value, "done");
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_with_backoff_exhausts_budget() {
        let policy = RetryPolicy::fixed(2, Duration::from_millis(1));
        let cancel = CancellationToken::new();

        let result: Result<((), u32), _> = retry_with_backoff(
            &policy,
            &cancel,
            "test",
            |_: &String| FailureType::Transient,
            |attempt| async move { Err(format!("attempt {attempt} failed")) },
        )
        .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 2);
        assert_eq!(exhausted.error, "attempt 2 failed");
        assert!(!exhausted.cancelled);
    }

    #[tokio::test]
    async fn test_retry_with_backoff_stops_on_permanent() {
        let policy = RetryPolicy::fixed(5, Duration::from_millis(1));
        let cancel = CancellationToken::new();

        let result: Result<((), u32), _> = retry_with_backoff(
            &policy,
            &cancel,
            "test",
            |_: &String| FailureType::Permanent,
            |_| async { Err("bad url".to_string()) },
        )
        .await;

        assert_eq!(result.unwrap_err().attempts, 1);
    }

    #[tokio::test]
    async fn test_retry_with_backoff_cancel_interrupts_sleep() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(3600));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result: Result<((), u32), _> = tokio::time::timeout(
            Duration::from_secs(5),
            retry_with_backoff(
                &policy,
                &cancel,
                "test",
                |_: &String| FailureType::Transient,
                |_| async { Err("boom".to_string()) },
            ),
        )
        .await
        .unwrap();

        let exhausted = result.unwrap_err();
        assert!(exhausted.cancelled);
        assert_eq!(exhausted.attempts, 1);
    }
}

//! Bounded retry with backoff for calls to external engines.
//!
//! Every network-facing adapter funnels its retryable calls through
//! [`retry`]. Only [`BackendError::is_transient`] failures are retried; a
//! permanent failure (bad request, missing file) returns on the first
//! attempt. Exhaustion hands the last error back to the adapter, which
//! decides whether that degrades to an empty result or fails the document.

use crate::error::BackendError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Wait schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// `(attempt + 1) × step` after the failed attempt (0-based).
    Linear { step_ms: u64 },
    /// `base × 2^attempt` after the failed attempt (0-based).
    Exponential { base_ms: u64 },
    /// Retry immediately.
    None,
}

impl Backoff {
    /// Delay after the 0-based `attempt` failed.
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Linear { step_ms } => {
                Duration::from_millis(step_ms.saturating_mul(u64::from(attempt) + 1))
            }
            Backoff::Exponential { base_ms } => {
                let factor = 1u64.checked_shl(attempt.min(63)).unwrap_or(u64::MAX);
                Duration::from_millis(base_ms.saturating_mul(factor))
            }
            Backoff::None => Duration::ZERO,
        }
    }
}

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total attempts including the first. `0` is treated as `1`.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    /// Three attempts, linear 1.5 s step: waits of 1.5 s then 3 s.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Linear { step_ms: 1500 },
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// A single attempt, no waiting.
    pub fn none() -> Self {
        Self::new(1, Backoff::None)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
///
/// `op` receives the 0-based attempt number. `what` names the operation in
/// log lines.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, BackendError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let attempts = policy.attempts();
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(v) => {
                if attempt > 0 {
                    debug!("{what}: succeeded on attempt {}", attempt + 1);
                }
                return Ok(v);
            }
            Err(e) if !e.is_transient() => {
                warn!("{what}: permanent failure, not retrying: {e}");
                return Err(e);
            }
            Err(e) => {
                warn!("{what}: attempt {}/{attempts} failed: {e}", attempt + 1);
                if attempt + 1 >= attempts {
                    return Err(e);
                }
                let wait = policy.backoff.delay(attempt);
                if !wait.is_zero() {
                    sleep(wait).await;
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> BackendError {
        BackendError::Transport {
            service: "test",
            detail: "connection reset".into(),
        }
    }

    #[test]
    fn linear_delays() {
        let b = Backoff::Linear { step_ms: 1500 };
        assert_eq!(b.delay(0), Duration::from_millis(1500));
        assert_eq!(b.delay(1), Duration::from_millis(3000));
        assert_eq!(b.delay(2), Duration::from_millis(4500));
    }

    #[test]
    fn exponential_delays() {
        let b = Backoff::Exponential { base_ms: 500 };
        assert_eq!(b.delay(0), Duration::from_millis(500));
        assert_eq!(b.delay(2), Duration::from_millis(2000));
        assert_eq!(b.delay(200), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn default_policy() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.backoff, Backoff::Linear { step_ms: 1500 });
    }

    #[test]
    fn policy_deserialises_from_options() {
        let p: RetryPolicy =
            serde_json::from_str(r#"{"max_attempts":5,"backoff":{"kind":"exponential","base_ms":10}}"#)
                .unwrap();
        assert_eq!(p, RetryPolicy::new(5, Backoff::Exponential { base_ms: 10 }));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Backoff::None);
        let out = retry(&policy, "flaky", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(transient())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(out.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Backoff::None);
        let out: Result<(), _> = retry(&policy, "down", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;
        assert!(matches!(out, Err(BackendError::Transport { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Backoff::None);
        let out: Result<(), _> = retry(&policy, "bad request", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(BackendError::Api {
                    service: "test",
                    status: 400,
                    message: "nope".into(),
                })
            }
        })
        .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(0, Backoff::None);
        let _ = retry(&policy, "once", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, BackendError>(()) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

//! Polling remote jobs until they settle or a wall-clock deadline passes.
//!
//! Cloud parses, vector-store indexing and assistant runs all follow the same
//! shape: submit, then ask "done yet?" at a fixed interval. [`Poller`] walks
//! the states
//!
//! ```text
//! Submitted ──▶ Processing ──▶ Completed
//!                    │    └──▶ Failed
//!                    └───────▶ TimedOut
//! ```
//!
//! and never waits past its deadline. A transient error while checking
//! status is logged and the next check proceeds; a permanent one ends the
//! poll immediately.

use crate::error::BackendError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// What a single status check reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus<T> {
    /// Still queued or running.
    Pending,
    /// Finished; carries whatever the check produced.
    Done(T),
    /// Finished unsuccessfully.
    Failed(String),
}

/// Where a poll currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Submitted,
    Processing,
    Completed,
    Failed,
    TimedOut,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollState::Completed | PollState::Failed | PollState::TimedOut
        )
    }
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PollState::Submitted => "submitted",
            PollState::Processing => "processing",
            PollState::Completed => "completed",
            PollState::Failed => "failed",
            PollState::TimedOut => "timed out",
        };
        f.write_str(s)
    }
}

/// Check interval and overall deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollPolicy {
    pub interval_ms: u64,
    /// Wall-clock ceiling for the whole poll, measured from the first check.
    pub deadline_secs: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            deadline_secs: 120,
        }
    }
}

impl PollPolicy {
    pub fn new(interval_ms: u64, deadline_secs: u64) -> Self {
        Self {
            interval_ms,
            deadline_secs,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

/// Drives one job from `Submitted` to a terminal state.
#[derive(Debug)]
pub struct Poller {
    service: &'static str,
    job: String,
    policy: PollPolicy,
    state: PollState,
    checks: u32,
}

impl Poller {
    pub fn new(service: &'static str, job: impl Into<String>, policy: PollPolicy) -> Self {
        Self {
            service,
            job: job.into(),
            policy,
            state: PollState::Submitted,
            checks: 0,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Status checks issued so far.
    pub fn checks(&self) -> u32 {
        self.checks
    }

    /// Call `check` until the job settles.
    ///
    /// `Done` → `Ok`, `Failed` → [`BackendError::JobFailed`], deadline →
    /// [`BackendError::Timeout`]. At least one check is always made.
    pub async fn run<T, F, Fut>(&mut self, mut check: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<JobStatus<T>, BackendError>>,
    {
        let started = Instant::now();
        let deadline = self.policy.deadline();

        loop {
            self.checks += 1;
            match check().await {
                Ok(JobStatus::Done(v)) => {
                    self.transition(PollState::Completed);
                    return Ok(v);
                }
                Ok(JobStatus::Failed(detail)) => {
                    self.transition(PollState::Failed);
                    return Err(BackendError::JobFailed {
                        service: self.service,
                        job: self.job.clone(),
                        detail,
                    });
                }
                Ok(JobStatus::Pending) => self.transition(PollState::Processing),
                Err(e) if e.is_transient() => {
                    warn!(
                        "{} job {}: status check {} failed, will retry: {e}",
                        self.service, self.job, self.checks
                    );
                }
                Err(e) => {
                    self.transition(PollState::Failed);
                    return Err(e);
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= deadline {
                self.transition(PollState::TimedOut);
                return Err(BackendError::Timeout {
                    what: format!("{} job {}", self.service, self.job),
                    secs: self.policy.deadline_secs,
                });
            }
            let wait = self.policy.interval().min(deadline - elapsed);
            if !wait.is_zero() {
                sleep(wait).await;
            }
        }
    }

    fn transition(&mut self, next: PollState) {
        if self.state != next {
            debug!(
                "{} job {}: {} → {}",
                self.service, self.job, self.state, next
            );
            self.state = next;
        }
    }
}

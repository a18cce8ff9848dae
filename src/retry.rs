//! Retry and polling bounded by a single operation deadline.
//!
//! Every remote call in a worker goes through [`retry_with_deadline`]: a fixed
//! number of attempts without backoff, and no attempt once the operation's
//! wall-clock budget is spent. [`poll_until`] repeats a probe at a fixed
//! interval until it reports success or the deadline passes.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{KcoError, Result};

/// Wall-clock budget of one operation, fixed when the operation starts.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Fail with [`KcoError::DeadlineExceeded`] once the budget is spent.
    pub fn ensure(&self, operation: &str) -> Result<()> {
        if self.is_expired() {
            return Err(KcoError::DeadlineExceeded(operation.to_string()));
        }
        Ok(())
    }
}

/// Number of retries after the first attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
}

impl RetryPolicy {
    pub const fn new(retries: u32) -> Self {
        Self { retries }
    }

    pub const fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// Run `op` until it succeeds, the attempts run out, or the deadline passes.
///
/// The deadline is checked before every attempt, including the first.
/// Non-transient errors are returned immediately. `op` receives the 1-based
/// attempt number.
pub async fn retry_with_deadline<F, Fut, T>(
    policy: RetryPolicy,
    deadline: &Deadline,
    operation: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts();
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        deadline.ensure(operation)?;

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                let retries_left = attempts - attempt;
                if retries_left > 0 {
                    warn!(
                        operation = %operation,
                        attempt = attempt,
                        retries_left = retries_left,
                        error = %e,
                        "{operation} failed, retrying"
                    );
                }
                last_error = e.to_string();
            }
        }
    }

    Err(KcoError::RetriesExhausted {
        operation: operation.to_string(),
        attempts,
        last_error,
    })
}

/// Probe every `interval` until it returns `true` or the deadline passes.
///
/// Returns `Ok(false)` on timeout. Transient probe errors count as "not yet";
/// other errors end the poll.
pub async fn poll_until<F, Fut>(
    deadline: &Deadline,
    interval: Duration,
    operation: &str,
    mut probe: F,
) -> Result<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    loop {
        match probe().await {
            Ok(true) => return Ok(true),
            Ok(false) => debug!(operation = %operation, "Condition not met yet"),
            Err(e) if e.is_transient() => {
                debug!(operation = %operation, error = %e, "Probe failed, will poll again");
            }
            Err(e) => return Err(e),
        }

        if deadline.is_expired() {
            warn!(operation = %operation, "Gave up polling, operation deadline reached");
            return Ok(false);
        }
        tokio::time::sleep(interval.min(deadline.remaining())).await;
    }
}

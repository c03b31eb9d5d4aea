//! Deadline-bounded calls with a fixed retry budget.
//!
//! Every cross-service call (direct reserve, task enqueue, reservation lookup)
//! goes through [`retry`]: each attempt gets its own deadline, failed attempts
//! are retried a fixed number of times with a fixed pause in between. Callees
//! must be idempotent, which the reservation ledger guarantees for reserves.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub attempts: u32,
    /// Pause between two attempts.
    pub delay: Duration,
    /// Deadline applied to each attempt.
    pub deadline: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration, deadline: Duration) -> Self {
        Self { attempts, delay, deadline }
    }

    /// A single attempt bounded by `deadline`.
    pub fn once(deadline: Duration) -> Self {
        Self::new(1, Duration::ZERO, deadline)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100), Duration::from_secs(1))
    }
}

#[derive(Debug, Error)]
pub enum CallError<E> {
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Failed(E),
}

impl<E> CallError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::Timeout(_))
    }
}

/// Runs `fut`, failing with [`CallError::Timeout`] once `deadline` elapses.
pub async fn with_deadline<T, E, Fut>(deadline: Duration, fut: Fut) -> Result<T, CallError<E>>
where
    Fut: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(CallError::Failed(e)),
        Err(_) => Err(CallError::Timeout(deadline)),
    }
}

/// Calls `op` until it succeeds or the policy's attempts are used up.
/// The last error is returned.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, CallError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match with_deadline(policy.deadline, op()).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                warn!(attempt, attempts, error = %e, "call failed, retrying");
                attempt += 1;
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

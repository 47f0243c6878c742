//! Retry-until-deadline policy shared by the store adapters.
//!
//! The deadline and the backoff are independent: the deadline bounds the
//! whole call, the backoff is the delay between two attempts. A sleep is
//! always clamped to the time left, so the loop never overshoots.

use crate::error::{MutexError, Result};
use std::thread;
use std::time::{Duration, Instant};

/// First delay between attempts.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(10);

/// Absolute point in time after which a call must give up.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

/// Exponential backoff schedule: `initial`, then doubling.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
}

impl Backoff {
    pub fn exponential(initial: Duration) -> Self {
        Self { next: initial }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(INITIAL_BACKOFF)
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = current.saturating_mul(2);
        Some(current)
    }
}

/// Result of a single attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    /// The attempt succeeded.
    Done(T),
    /// The attempt failed in a way another attempt may fix.
    Retry(String),
    /// The attempt failed in a way retrying cannot fix.
    Fail(MutexError),
}

/// Run `attempt` until it succeeds, fails permanently, or `deadline` passes.
///
/// The attempt receives the deadline so it can bound its own I/O by
/// `deadline.remaining()`. When the deadline elapses the last retry reason is
/// returned inside `MutexError::DeadlineExceeded`.
pub fn retry_until_deadline<T, B, F>(deadline: Deadline, mut backoff: B, mut attempt: F) -> Result<T>
where
    B: Iterator<Item = Duration>,
    F: FnMut(&Deadline) -> Attempt<T>,
{
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        let reason = match attempt(&deadline) {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fail(err) => return Err(err),
            Attempt::Retry(reason) => reason,
        };

        let remaining = deadline.remaining();
        if remaining.is_zero() {
            return Err(MutexError::DeadlineExceeded {
                attempts,
                last_failure: reason,
            });
        }

        let delay = backoff.next().unwrap_or(remaining).min(remaining);
        tracing::debug!(attempt = attempts, ?delay, %reason, "retrying store call");
        thread::sleep(delay);

        if deadline.is_expired() {
            return Err(MutexError::DeadlineExceeded {
                attempts,
                last_failure: reason,
            });
        }
    }
}

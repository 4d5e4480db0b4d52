//! WD-013: Fixed-count, fixed-interval retry with cancellation.

use super::error::{Error, Result};
use crate::client::ClientError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Slice used while waiting so cancellation is observed promptly.
const POLL: Duration = Duration::from_millis(50);

/// Retry schedule for remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            interval: Duration::from_secs(1),
        }
    }
}

/// Cooperative cancellation: an explicit flag plus an optional deadline.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that cancels itself once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Sleep for `duration`, returning early with `Cancelled`.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let end = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let now = Instant::now();
            if now >= end {
                return Ok(());
            }
            std::thread::sleep(POLL.min(end - now));
        }
    }
}

/// Run `op`, retrying transient client errors per `policy`.
pub fn retry<T>(
    policy: &RetryPolicy,
    token: &CancelToken,
    label: &str,
    mut op: impl FnMut() -> std::result::Result<T, ClientError>,
) -> Result<T> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        attempt += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                tracing::warn!(
                    "{}: attempt {}/{} failed ({}); retrying in {:?}",
                    label,
                    attempt,
                    attempts,
                    e,
                    policy.interval
                );
                token.sleep(policy.interval)?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

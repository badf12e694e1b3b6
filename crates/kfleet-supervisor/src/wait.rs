//! Deadline-bearing polling with cooperative cancellation.
//!
//! Every suspension point of the supervisor (PID file, port readiness,
//! process exit) goes through [`wait_for`], so every one of them honours the
//! same [`CancelToken`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use kfleet_supervisor::wait::{wait_for, CancelToken, WaitBudget, WaitOutcome};
//!
//! let budget = WaitBudget::attempts(5, Duration::from_millis(1));
//! let mut polls = 0;
//! let outcome = wait_for(budget, &CancelToken::new(), || {
//!     polls += 1;
//!     (polls == 3).then_some(polls)
//! });
//! assert_eq!(outcome, WaitOutcome::Ready(3));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// How long to keep polling and how often.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitBudget {
    pub timeout: Duration,
    pub interval: Duration,
}

impl WaitBudget {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    /// A retry-count budget: roughly `attempts` polls, `interval` apart.
    pub fn attempts(attempts: u32, interval: Duration) -> Self {
        Self {
            timeout: interval.saturating_mul(attempts),
            interval,
        }
    }
}

/// Result of a [`wait_for`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    Ready(T),
    TimedOut,
    Cancelled,
}

/// Shared cancellation flag.  Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the token.  Every in-flight and future wait returns
    /// [`WaitOutcome::Cancelled`] until [`CancelToken::reset`].
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Poll `probe` until it yields a value, the budget runs out, or `cancel`
/// trips.
///
/// `probe` runs once immediately and once more at the deadline, so a budget
/// with a zero timeout still checks exactly once.
pub fn wait_for<T>(
    budget: WaitBudget,
    cancel: &CancelToken,
    mut probe: impl FnMut() -> Option<T>,
) -> WaitOutcome<T> {
    let deadline = Instant::now() + budget.timeout;
    loop {
        if cancel.is_cancelled() {
            return WaitOutcome::Cancelled;
        }
        if let Some(value) = probe() {
            return WaitOutcome::Ready(value);
        }
        let now = Instant::now();
        if now >= deadline {
            return WaitOutcome::TimedOut;
        }
        thread::sleep(budget.interval.min(deadline - now));
    }
}

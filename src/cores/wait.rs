//! Blocking-wait policy shared by the limiter cores.
//!
//! Waiting is retry-with-sleep: the waiter polls the limiter, and on denial
//! sleeps for a retry delay before polling again. Wake-up is therefore an
//! approximation of token availability, bounded by the retry delay, not an
//! exact notification. Waiters are not queued; any waiter may take the next
//! token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{WaitError, WaitResult};

/// Smallest sleep between two retries.
///
/// For rates above 1000 tokens/sec the per-token interval drops below one
/// millisecond; the delay is clamped here so a waiter never spins.
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Returns the delay a waiter sleeps between retries for a given rate:
/// the time to generate one token, clamped to [`MIN_RETRY_DELAY`].
///
/// Rates so small that one token interval does not fit in a [`Duration`]
/// saturate at [`Duration::MAX`].
///
/// # Panics
///
/// Panics if `rate` is not a positive finite number.
#[inline]
pub fn retry_delay_for_rate(rate: f64) -> Duration {
    assert!(
        rate.is_finite() && rate > 0.0,
        "rate must be a positive finite number"
    );
    saturating_secs_f64(1.0 / rate).max(MIN_RETRY_DELAY)
}

/// `Duration::from_secs_f64` that saturates at [`Duration::MAX`] instead of
/// panicking.
pub(crate) fn saturating_secs_f64(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// A shareable cancellation signal for blocked waiters.
///
/// Clones observe the same flag. Once cancelled it stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag. Waiters notice it before their next retry.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Parameters for [`RateLimit::wait_with`](crate::RateLimit::wait_with).
///
/// The default waits forever, sleeping the limiter's own retry delay.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use rate_gate::cores::{CancellationFlag, WaitOptions};
///
/// let flag = CancellationFlag::new();
/// let options = WaitOptions::new()
///     .timeout(Duration::from_secs(2))
///     .retry_delay(Duration::from_millis(20))
///     .cancel_on(flag.clone());
/// assert_eq!(options.retry_delay_override(), Some(Duration::from_millis(20)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct WaitOptions {
    retry_delay: Option<Duration>,
    deadline: Option<Instant>,
    cancel: Option<CancellationFlag>,
}

impl WaitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the sleep between retries. Clamped to [`MIN_RETRY_DELAY`].
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay.max(MIN_RETRY_DELAY));
        self
    }

    /// Gives up with [`WaitError::TimedOut`] once `deadline` has passed.
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Gives up with [`WaitError::TimedOut`] after `timeout` from now.
    ///
    /// A timeout too large to represent as an [`Instant`] (such as
    /// [`Duration::MAX`]) sets no deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self
    }

    /// Gives up with [`WaitError::Cancelled`] once `flag` is raised.
    pub fn cancel_on(mut self, flag: CancellationFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn retry_delay_override(&self) -> Option<Duration> {
        self.retry_delay
    }

    pub fn deadline_at(&self) -> Option<Instant> {
        self.deadline
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map_or(false, CancellationFlag::is_cancelled)
    }
}

/// Polls `attempt` until it succeeds or `options` tell the waiter to stop.
///
/// The cancellation flag is checked before every attempt so a cancelled
/// waiter never consumes a token. Sleeps never run past the deadline.
pub(crate) fn retry_until<F>(mut attempt: F, default_delay: Duration, options: &WaitOptions) -> WaitResult
where
    F: FnMut() -> bool,
{
    let delay = options.retry_delay.unwrap_or(default_delay);

    loop {
        if options.is_cancelled() {
            return Err(WaitError::Cancelled);
        }

        if attempt() {
            return Ok(());
        }

        let sleep_for = match options.deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(WaitError::TimedOut);
                }
                delay.min(deadline - now)
            }
            None => delay,
        };

        thread::sleep(sleep_for);
    }
}

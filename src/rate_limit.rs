//! The admission-check trait.
//!
//! Every limiter in this crate, and every decorator around one, implements
//! [`RateLimit`]. Adapters such as [`HttpRateLimiter`](crate::http::HttpRateLimiter)
//! depend only on this trait, never on a concrete bucket.

use std::sync::Arc;

use crate::cores::WaitOptions;
use crate::error::WaitResult;

/// The admission-check contract.
///
/// Implementors decide whether one unit of work may proceed now
/// ([`try_acquire`](RateLimit::try_acquire)) or block the caller until it may
/// ([`wait`](RateLimit::wait)).
pub trait RateLimit: Send + Sync {
    /// Attempts to admit one unit of work without blocking.
    ///
    /// # Returns
    /// * `true` if the caller may proceed
    /// * `false` if the caller must not proceed now
    fn try_acquire(&self) -> bool;

    /// Blocks the calling thread until one unit of work is admitted.
    ///
    /// There is no timeout; use [`wait_with`](RateLimit::wait_with) for a
    /// deadline or cancellation.
    fn wait(&self);

    /// Blocks until admitted, the deadline passes, or the wait is cancelled.
    ///
    /// # Returns
    /// * `Ok(())` once a token has been consumed
    /// * `Err(WaitError::TimedOut)` if the deadline passed first
    /// * `Err(WaitError::Cancelled)` if the cancellation flag was raised first
    fn wait_with(&self, options: &WaitOptions) -> WaitResult;
}

impl<L: RateLimit + ?Sized> RateLimit for Arc<L> {
    #[inline(always)]
    fn try_acquire(&self) -> bool {
        (**self).try_acquire()
    }

    #[inline(always)]
    fn wait(&self) {
        (**self).wait()
    }

    #[inline(always)]
    fn wait_with(&self, options: &WaitOptions) -> WaitResult {
        (**self).wait_with(options)
    }
}

impl<L: RateLimit + ?Sized> RateLimit for Box<L> {
    #[inline(always)]
    fn try_acquire(&self) -> bool {
        (**self).try_acquire()
    }

    #[inline(always)]
    fn wait(&self) {
        (**self).wait()
    }

    #[inline(always)]
    fn wait_with(&self, options: &WaitOptions) -> WaitResult {
        (**self).wait_with(options)
    }
}

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::clock::{Clock, SystemClock};
use crate::cores::wait::{retry_delay_for_rate, retry_until, saturating_secs_f64, WaitOptions};
use crate::error::WaitResult;
use crate::rate_limit::RateLimit;

/// Thread-safe token bucket over wall-clock time.
///
/// The bucket holds up to `capacity` tokens and gains `rate` tokens per
/// second. Every admitted unit of work consumes one token. Refill is lazy:
/// it is computed from the time elapsed since the previous call each time the
/// bucket is touched, so no background timer is needed.
///
/// # Algorithm Behavior
///
/// - The bucket starts full with `capacity` tokens, allowing an initial burst
/// - On each call, `tokens = min(capacity, tokens + elapsed_secs * rate)`
/// - If at least one token is available it is consumed and the call is admitted
/// - Otherwise the call is denied and the fractional remainder is kept
///
/// Tokens are tracked as `f64`, so partial tokens earned between two calls are
/// never lost; long-run throughput converges on `rate` regardless of how
/// often the bucket is polled.
///
/// # Example
///
/// ```rust
/// use rate_gate::cores::TokenBucket;
///
/// // 10 tokens per second, bursts of up to 3
/// let bucket = TokenBucket::new(10.0, 3.0);
///
/// assert!(bucket.try_acquire());
/// assert!(bucket.try_acquire());
/// assert!(bucket.try_acquire());
///
/// // Burst spent
/// assert!(!bucket.try_acquire());
/// ```
#[derive(Debug)]
pub struct TokenBucket<C: Clock = SystemClock> {
    /// Tokens generated per second
    rate: f64,
    /// Maximum number of tokens the bucket can hold
    capacity: f64,
    /// Sleep between retries of a blocked waiter
    retry_delay: Duration,
    /// Time source for refill calculations
    clock: C,
    /// Refill and consume happen under this one lock
    state: Mutex<TokenBucketState>,
}

#[derive(Debug)]
struct TokenBucketState {
    /// Current number of tokens, in `[0, capacity]`
    tokens: f64,
    /// Instant of the last refill calculation
    last_update: Instant,
}

impl TokenBucket {
    /// Creates a full token bucket on the system clock.
    ///
    /// # Parameters
    ///
    /// * `rate` - Tokens generated per second
    /// * `capacity` - Maximum number of tokens held (burst size)
    ///
    /// # Panics
    ///
    /// Panics if `rate` or `capacity` is not a positive finite number. Use
    /// [`LimiterConfig`](crate::config::LimiterConfig) to validate untrusted input first.
    ///
    /// # Example
    ///
    /// ```rust
    /// use rate_gate::cores::TokenBucket;
    ///
    /// let bucket = TokenBucket::new(5.0, 5.0);
    /// assert_eq!(bucket.capacity(), 5.0);
    /// ```
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self::with_clock(rate, capacity, SystemClock)
    }
}

impl<C: Clock> TokenBucket<C> {
    /// Creates a full token bucket reading time from `clock`.
    ///
    /// # Panics
    ///
    /// Panics if `rate` or `capacity` is not a positive finite number.
    pub fn with_clock(rate: f64, capacity: f64, clock: C) -> Self {
        assert!(rate.is_finite() && rate > 0.0, "rate must be greater than 0");
        assert!(
            capacity.is_finite() && capacity > 0.0,
            "capacity must be greater than 0"
        );

        let last_update = clock.now();
        TokenBucket {
            rate,
            capacity,
            retry_delay: retry_delay_for_rate(rate),
            clock,
            state: Mutex::new(TokenBucketState {
                tokens: capacity, // Bucket starts full
                last_update,
            }),
        }
    }

    /// Tokens generated per second.
    #[inline(always)]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Maximum number of tokens the bucket can hold.
    #[inline(always)]
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Sleep between retries used by [`wait`](Self::wait): one token interval,
    /// clamped to [`MIN_RETRY_DELAY`](crate::cores::MIN_RETRY_DELAY).
    #[inline(always)]
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Attempts to consume one token. Never blocks on the rate.
    #[inline(always)]
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_n(1)
    }

    /// Attempts to consume `tokens` tokens at once.
    ///
    /// Zero tokens always succeeds. A request larger than the capacity can
    /// never succeed and is denied.
    ///
    /// # Returns
    /// * `true` if the tokens were consumed
    /// * `false` if not enough tokens are available; nothing is consumed
    pub fn try_acquire_n(&self, tokens: u32) -> bool {
        if tokens == 0 {
            return true;
        }

        let wanted = f64::from(tokens);
        let mut state = self.lock_refilled();

        if state.tokens >= wanted {
            state.tokens -= wanted;
            true
        } else {
            trace!(
                requested = tokens,
                available = state.tokens,
                "token bucket denied admission"
            );
            false
        }
    }

    /// Returns the current token count after applying refill.
    pub fn available(&self) -> f64 {
        self.lock_refilled().tokens
    }

    /// Returns how long until one token is available, zero if one is now.
    pub fn retry_after(&self) -> Duration {
        let state = self.lock_refilled();
        if state.tokens >= 1.0 {
            Duration::ZERO
        } else {
            saturating_secs_f64((1.0 - state.tokens) / self.rate)
        }
    }

    /// Blocks until one token is consumed. No timeout.
    ///
    /// Sleeps [`retry_delay`](Self::retry_delay) between attempts.
    pub fn wait(&self) {
        // No deadline and no flag: the loop only ends on success.
        let acquired = retry_until(|| self.try_acquire(), self.retry_delay, &WaitOptions::default());
        debug_assert!(acquired.is_ok());
    }

    /// Blocks until one token is consumed, the deadline passes, or the wait
    /// is cancelled.
    pub fn wait_with(&self, options: &WaitOptions) -> WaitResult {
        retry_until(|| self.try_acquire(), self.retry_delay, options)
    }

    /// Takes the state lock and brings the token count up to date.
    ///
    /// A poisoned lock is recovered: the state is two numbers that are
    /// always written together, so a panic elsewhere cannot tear it.
    fn lock_refilled(&self) -> MutexGuard<'_, TokenBucketState> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(state.last_update);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
        state.last_update = now;
        state
    }
}

impl<C: Clock> RateLimit for TokenBucket<C> {
    #[inline(always)]
    fn try_acquire(&self) -> bool {
        TokenBucket::try_acquire(self)
    }

    #[inline(always)]
    fn wait(&self) {
        TokenBucket::wait(self)
    }

    #[inline(always)]
    fn wait_with(&self, options: &WaitOptions) -> WaitResult {
        TokenBucket::wait_with(self, options)
    }
}

/// Configuration structure for creating a [`TokenBucket`].
///
/// Values are not validated; conversion panics on non-positive input. Build
/// from a validated [`LimiterConfig`](crate::config::LimiterConfig) when the
/// values come from outside the program.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketConfig {
    /// Tokens generated per second.
    pub rate: f64,
    /// Maximum number of tokens held.
    pub capacity: f64,
}

impl TokenBucketConfig {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self { rate, capacity }
    }
}

impl From<TokenBucketConfig> for TokenBucket {
    /// Converts a `TokenBucketConfig` into a full `TokenBucket`.
    ///
    /// # Panics
    /// Panics if `rate` or `capacity` is not positive.
    ///
    /// # Example
    ///
    /// ```
    /// use rate_gate::cores::{TokenBucket, TokenBucketConfig};
    ///
    /// let bucket: TokenBucket = TokenBucketConfig { rate: 10.0, capacity: 20.0 }.into();
    /// assert_eq!(bucket.rate(), 10.0);
    /// ```
    #[inline(always)]
    fn from(config: TokenBucketConfig) -> Self {
        TokenBucket::new(config.rate, config.capacity)
    }
}

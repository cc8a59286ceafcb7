//! Admission statistics.
//!
//! [`Stats`] counts allowed and denied admissions. [`WithStats`] wraps any
//! [`RateLimit`] and feeds a [`Stats`] without changing its decisions.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant, SystemTime};

use serde::Serialize;

use crate::cores::WaitOptions;
use crate::error::WaitResult;
use crate::rate_limit::RateLimit;

/// Something that records admission outcomes.
pub trait StatsCollector: Send + Sync {
    fn record_allowed(&self);
    fn record_denied(&self);
    fn snapshot(&self) -> StatsSnapshot;
    /// Zeroes every counter and restarts the observation period.
    fn reset(&self);
}

impl<S: StatsCollector + ?Sized> StatsCollector for Arc<S> {
    fn record_allowed(&self) {
        (**self).record_allowed()
    }

    fn record_denied(&self) {
        (**self).record_denied()
    }

    fn snapshot(&self) -> StatsSnapshot {
        (**self).snapshot()
    }

    fn reset(&self) {
        (**self).reset()
    }
}

/// A point-in-time view of collected statistics.
///
/// `duration`, `rate` and `acceptance_ratio` are derived when the snapshot
/// is taken.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total: u64,
    pub allowed: u64,
    pub denied: u64,
    pub started_at: SystemTime,
    pub last_activity: Option<SystemTime>,
    /// Observation period: up to the last event if any, else up to now.
    pub duration: Duration,
    /// Allowed admissions per second over `duration`.
    pub rate: f64,
    /// `allowed / total`, or 0 when nothing was recorded.
    pub acceptance_ratio: f64,
}

#[derive(Debug)]
struct StatsState {
    allowed: u64,
    denied: u64,
    started: Instant,
    started_at: SystemTime,
    last_activity: Option<Instant>,
}

impl StatsState {
    fn fresh() -> Self {
        Self {
            allowed: 0,
            denied: 0,
            started: Instant::now(),
            started_at: SystemTime::now(),
            last_activity: None,
        }
    }
}

/// Lock-protected allowed/denied counters.
///
/// Both counters and the activity timestamp sit behind one lock, so every
/// snapshot satisfies `total == allowed + denied`.
#[derive(Debug)]
pub struct Stats {
    state: RwLock<StatsState>,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StatsState::fresh()),
        }
    }

    fn record(&self, allowed: bool) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if allowed {
            state.allowed += 1;
        } else {
            state.denied += 1;
        }
        state.last_activity = Some(Instant::now());
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsCollector for Stats {
    fn record_allowed(&self) {
        self.record(true);
    }

    fn record_denied(&self) {
        self.record(false);
    }

    fn snapshot(&self) -> StatsSnapshot {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);

        let duration = match state.last_activity {
            Some(last) => last.saturating_duration_since(state.started),
            None => state.started.elapsed(),
        };
        let total = state.allowed + state.denied;

        let secs = duration.as_secs_f64();
        let rate = if secs > 0.0 {
            state.allowed as f64 / secs
        } else {
            0.0
        };
        let acceptance_ratio = if total > 0 {
            state.allowed as f64 / total as f64
        } else {
            0.0
        };

        StatsSnapshot {
            total,
            allowed: state.allowed,
            denied: state.denied,
            started_at: state.started_at,
            last_activity: state
                .last_activity
                .map(|last| state.started_at + last.saturating_duration_since(state.started)),
            duration,
            rate,
            acceptance_ratio,
        }
    }

    fn reset(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = StatsState::fresh();
    }
}

/// Decorates a limiter with statistics collection.
///
/// Calls are forwarded unchanged; only their outcomes are recorded.
///
/// # Example
///
/// ```rust
/// use rate_gate::cores::TokenBucket;
/// use rate_gate::stats::{StatsCollector, WithStats};
/// use rate_gate::RateLimit;
///
/// let limiter = WithStats::new(TokenBucket::new(1.0, 2.0));
/// limiter.try_acquire();
/// limiter.try_acquire();
/// limiter.try_acquire();
///
/// let snapshot = limiter.stats().snapshot();
/// assert_eq!(snapshot.allowed, 2);
/// assert_eq!(snapshot.denied, 1);
/// ```
#[derive(Debug)]
pub struct WithStats<L, S = Stats> {
    inner: L,
    stats: S,
}

impl<L: RateLimit> WithStats<L> {
    pub fn new(inner: L) -> Self {
        Self::with_collector(inner, Stats::new())
    }
}

impl<L: RateLimit, S: StatsCollector> WithStats<L, S> {
    /// Wraps `inner`, reporting outcomes to `stats`.
    pub fn with_collector(inner: L, stats: S) -> Self {
        Self { inner, stats }
    }

    pub fn stats(&self) -> &S {
        &self.stats
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    pub fn into_inner(self) -> L {
        self.inner
    }
}

impl<L: RateLimit, S: StatsCollector> RateLimit for WithStats<L, S> {
    fn try_acquire(&self) -> bool {
        let allowed = self.inner.try_acquire();
        if allowed {
            self.stats.record_allowed();
        } else {
            self.stats.record_denied();
        }
        allowed
    }

    fn wait(&self) {
        self.inner.wait();
        self.stats.record_allowed();
    }

    fn wait_with(&self, options: &WaitOptions) -> WaitResult {
        let result = self.inner.wait_with(options);
        if result.is_ok() {
            self.stats.record_allowed();
        }
        result
    }
}

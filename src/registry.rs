//! Per-key limiter registry.
//!
//! [`KeyedRegistry`] lazily creates one limiter per key (client IP, user id,
//! API key, ...) and shares it between every caller presenting that key.
//! Entries are never dropped implicitly; memory is bounded by running
//! [`KeyedRegistry::sweep`] with an [`EvictionPolicy`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::error::{BoxError, RegistryError};
use crate::rate_limit::RateLimit;

type Factory<L> = Box<dyn Fn() -> Result<L, BoxError> + Send + Sync>;

/// A registry entry: the shared limiter and when it was last handed out.
struct Slot<L> {
    limiter: Arc<L>,
    /// Nanoseconds since the registry epoch.
    last_access: AtomicU64,
}

impl<L> Slot<L> {
    fn touch(&self, stamp: u64) {
        self.last_access.fetch_max(stamp, Ordering::Relaxed);
    }

    fn stamp(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }
}

/// Maps string keys to lazily created, shared limiters.
///
/// For every key at most one limiter is ever observable: when several threads
/// look up an unseen key at the same time, the factory runs once under the
/// key's shard lock and every caller receives the same [`Arc`].
///
/// Lookups of existing keys only take a shard read lock.
///
/// The factory must not call back into the same registry.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use rate_gate::cores::TokenBucket;
/// use rate_gate::registry::KeyedRegistry;
///
/// let registry = KeyedRegistry::new(|| TokenBucket::new(10.0, 2.0));
///
/// let a = registry.get_or_create("10.0.0.1").unwrap();
/// let b = registry.get_or_create("10.0.0.1").unwrap();
/// assert!(Arc::ptr_eq(&a, &b));
///
/// assert_eq!(registry.try_acquire("10.0.0.2").unwrap(), true);
/// assert_eq!(registry.len(), 2);
/// ```
pub struct KeyedRegistry<L, C: Clock = SystemClock> {
    entries: DashMap<String, Slot<L>>,
    factory: Factory<L>,
    clock: C,
    epoch: Instant,
}

impl<L: Send + Sync + 'static> KeyedRegistry<L> {
    /// Creates an empty registry with an infallible limiter factory.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> L + Send + Sync + 'static,
    {
        Self::with_clock(factory, SystemClock)
    }

    /// Creates an empty registry with a fallible limiter factory.
    ///
    /// A factory error is returned to the caller that triggered creation and
    /// leaves the key vacant.
    pub fn try_new<F, E>(factory: F) -> Self
    where
        F: Fn() -> Result<L, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::try_with_clock(factory, SystemClock)
    }
}

impl<L: Send + Sync + 'static, C: Clock> KeyedRegistry<L, C> {
    /// Like [`new`](KeyedRegistry::new), reading access times from `clock`.
    pub fn with_clock<F>(factory: F, clock: C) -> Self
    where
        F: Fn() -> L + Send + Sync + 'static,
    {
        Self::try_with_clock(move || Ok::<L, BoxError>(factory()), clock)
    }

    /// Like [`try_new`](KeyedRegistry::try_new), reading access times from `clock`.
    pub fn try_with_clock<F, E>(factory: F, clock: C) -> Self
    where
        F: Fn() -> Result<L, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        let epoch = clock.now();
        Self {
            entries: DashMap::new(),
            factory: Box::new(move || factory().map_err(Into::into)),
            clock,
            epoch,
        }
    }
}

impl<L, C: Clock> KeyedRegistry<L, C> {
    /// Returns the limiter for `key`, creating it on first access.
    ///
    /// # Returns
    /// * `Ok(limiter)` - the one limiter shared by every caller for `key`
    /// * `Err(RegistryError::Factory)` - the factory failed; nothing was stored
    pub fn get_or_create(&self, key: &str) -> Result<Arc<L>, RegistryError> {
        let now = self.stamp();

        if let Some(slot) = self.entries.get(key) {
            slot.touch(now);
            return Ok(Arc::clone(&slot.limiter));
        }

        match self.entries.entry(key.to_owned()) {
            // Another caller won the race between the read and the write lock.
            Entry::Occupied(occupied) => {
                let slot = occupied.get();
                slot.touch(now);
                Ok(Arc::clone(&slot.limiter))
            }
            Entry::Vacant(vacant) => {
                let limiter = (self.factory)().map_err(|source| RegistryError::Factory {
                    key: key.to_owned(),
                    source,
                })?;
                let limiter = Arc::new(limiter);
                vacant.insert(Slot {
                    limiter: Arc::clone(&limiter),
                    last_access: AtomicU64::new(now),
                });
                debug!(key, "created limiter for new key");
                Ok(limiter)
            }
        }
    }

    /// Returns the limiter for `key` if one exists, without creating it.
    pub fn get(&self, key: &str) -> Option<Arc<L>> {
        self.entries.get(key).map(|slot| Arc::clone(&slot.limiter))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Drops the entry for `key`. Holders of the old limiter keep it; the
    /// next lookup creates a fresh one.
    pub fn remove(&self, key: &str) -> Option<Arc<L>> {
        self.entries.remove(key).map(|(_, slot)| slot.limiter)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns every key currently held, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Applies `policy` and removes the entries it selects.
    ///
    /// An entry accessed after the policy looked at it is kept.
    ///
    /// # Returns
    /// The number of entries removed.
    pub fn sweep(&self, policy: &dyn EvictionPolicy) -> usize {
        let now = self.stamp();
        let infos: Vec<EntryInfo> = self
            .entries
            .iter()
            .map(|entry| {
                let stamp = entry.value().stamp();
                EntryInfo {
                    key: entry.key().clone(),
                    idle: Duration::from_nanos(now.saturating_sub(stamp)),
                    stamp,
                }
            })
            .collect();

        let stamps: HashMap<&str, u64> = infos
            .iter()
            .map(|info| (info.key.as_str(), info.stamp))
            .collect();

        let mut removed = 0;
        for key in policy.select(&infos) {
            let Some(&seen) = stamps.get(key.as_str()) else {
                continue;
            };
            if self
                .entries
                .remove_if(&key, |_, slot| slot.stamp() == seen)
                .is_some()
            {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "evicted limiters");
        }
        removed
    }

    fn stamp(&self) -> u64 {
        let since_epoch = self.clock.now().saturating_duration_since(self.epoch);
        u64::try_from(since_epoch.as_nanos()).unwrap_or(u64::MAX)
    }
}

impl<L: RateLimit, C: Clock> KeyedRegistry<L, C> {
    /// Runs a non-blocking admission check against the limiter for `key`.
    pub fn try_acquire(&self, key: &str) -> Result<bool, RegistryError> {
        Ok(self.get_or_create(key)?.try_acquire())
    }
}

impl<L, C: Clock> fmt::Debug for KeyedRegistry<L, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedRegistry")
            .field("len", &self.entries.len())
            .finish_non_exhaustive()
    }
}

/// What an [`EvictionPolicy`] sees about one registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// The entry's key.
    pub key: String,
    /// Time since the entry was last handed out.
    pub idle: Duration,
    stamp: u64,
}

impl EntryInfo {
    /// Builds an entry description, for testing custom policies.
    pub fn new(key: impl Into<String>, idle: Duration) -> Self {
        Self {
            key: key.into(),
            idle,
            stamp: 0,
        }
    }
}

/// Chooses which registry entries to reclaim.
pub trait EvictionPolicy: Send + Sync {
    /// Returns the keys to remove from `entries`.
    fn select(&self, entries: &[EntryInfo]) -> Vec<String>;
}

/// Evicts entries that have been idle for longer than the given duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleTimeout(pub Duration);

impl EvictionPolicy for IdleTimeout {
    fn select(&self, entries: &[EntryInfo]) -> Vec<String> {
        entries
            .iter()
            .filter(|info| info.idle > self.0)
            .map(|info| info.key.clone())
            .collect()
    }
}

/// Keeps at most the given number of entries, evicting the least recently
/// used first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxEntries(pub usize);

impl EvictionPolicy for MaxEntries {
    fn select(&self, entries: &[EntryInfo]) -> Vec<String> {
        let excess = entries.len().saturating_sub(self.0);
        if excess == 0 {
            return Vec::new();
        }

        let mut by_idle: Vec<&EntryInfo> = entries.iter().collect();
        by_idle.sort_by(|a, b| b.idle.cmp(&a.idle));
        by_idle
            .into_iter()
            .take(excess)
            .map(|info| info.key.clone())
            .collect()
    }
}

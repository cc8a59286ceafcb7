//! Core admission-control algorithms.
//!
//! - **[`TokenBucket`]** - lazily refilled token bucket over wall-clock time,
//!   allowing bursts up to its capacity while holding the average rate
//! - **[`wait`]** - the retry-with-sleep policy used by blocking waiters
//!
//! # Thread Safety
//!
//! A bucket's refill and consume steps run inside one mutex, so concurrent
//! callers always see a consistent token count. Share a bucket between
//! threads with [`Arc`](std::sync::Arc).

pub mod token_bucket_core;
pub use token_bucket_core::TokenBucket;
pub use token_bucket_core::TokenBucketConfig;

pub mod wait;
pub use wait::{retry_delay_for_rate, CancellationFlag, WaitOptions, MIN_RETRY_DELAY};

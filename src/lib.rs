//! Thread-safe admission control built on the token bucket algorithm.
//!
//! A [`TokenBucket`](cores::TokenBucket) decides whether one unit of work (an
//! HTTP request, a job, a message) may proceed now, must wait, or must be
//! rejected. A [`KeyedRegistry`](registry::KeyedRegistry) hands every caller
//! key its own bucket, and the [`http`] module gates requests with either.
//!
//! # Quick Start
//!
//! ```rust
//! use rate_gate::cores::TokenBucket;
//! use rate_gate::RateLimit;
//!
//! // 10 tokens per second, bursts of up to 20
//! let limiter = TokenBucket::new(10.0, 20.0);
//!
//! if limiter.try_acquire() {
//!     println!("Request allowed");
//! } else {
//!     println!("Request denied");
//! }
//!
//! // Or block until a token is available
//! limiter.wait();
//! ```
//!
//! # Per-key Limits
//!
//! ```rust
//! use rate_gate::cores::TokenBucket;
//! use rate_gate::registry::{IdleTimeout, KeyedRegistry};
//! use std::time::Duration;
//!
//! let registry = KeyedRegistry::new(|| TokenBucket::new(5.0, 5.0));
//! assert!(registry.try_acquire("user-42").unwrap());
//!
//! // Reclaim keys nobody has used for ten minutes
//! registry.sweep(&IdleTimeout(Duration::from_secs(600)));
//! ```
//!
//! # Core Concepts
//!
//! ## Time Representation
//! Buckets refill from wall-clock time read through a [`Clock`](clock::Clock).
//! Production code uses [`SystemClock`](clock::SystemClock); tests drive a
//! [`ManualClock`](clock::ManualClock) to make refill exact.
//!
//! ## Outcomes
//! A denied admission is `false`, never an error. Errors only come from the
//! edges:
//! - **[`WaitError`]** - a bounded wait timed out or was cancelled
//! - **[`RegistryError`]** - a limiter factory failed for a new key
//! - **[`ConfigError`]** - configuration failed validation, parsing or I/O
//!
//! ## Thread Safety
//! Every limiter is `Send + Sync`. A bucket's refill and consume steps share
//! one critical section; the registry is a sharded concurrent map.
//!
//! ## Logging
//! The crate emits [`tracing`] events (limiter creation and eviction at
//! `debug`, denials at `trace`, config I/O at `info`) and never installs a
//! subscriber.

pub mod clock;
pub mod config;
pub mod cores;
pub mod error;
pub mod http;
pub mod rate_limit;
pub mod registry;
pub mod stats;

pub use error::{BoxError, ConfigError, RegistryError, WaitError, WaitResult};
pub use rate_limit::RateLimit;

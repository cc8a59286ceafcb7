//! error.rs
//! Error types for the blocking wait, the keyed registry and configuration.
//!
//! A denied admission is never an error: `try_acquire` reports it as `false`.

use std::path::PathBuf;

use thiserror::Error;

/// Boxed error produced by a fallible limiter factory.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Outcome of a hardened wait that gave up before a token was acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    /// The caller's cancellation flag was raised.
    #[error("wait cancelled before a token became available")]
    Cancelled,
    /// The deadline passed before a token became available.
    #[error("wait timed out before a token became available")]
    TimedOut,
}

/// Result type for hardened waits.
pub type WaitResult = Result<(), WaitError>;

/// Errors raised by [`KeyedRegistry`](crate::registry::KeyedRegistry).
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The limiter factory failed while creating the limiter for `key`.
    ///
    /// The entry stays vacant, so a later lookup retries construction.
    #[error("limiter factory failed for key `{key}`")]
    Factory {
        key: String,
        #[source]
        source: BoxError,
    },
}

/// Errors raised while validating, loading or saving limiter configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("rate must be positive")]
    NonPositiveRate,

    #[error("burst must be positive")]
    NonPositiveBurst,

    #[error("burst ({burst}) must be greater than or equal to rate ({rate})")]
    BurstBelowRate { rate: u32, burst: u32 },

    #[error("config name cannot be empty")]
    EmptyName,

    #[error("custom header `{name}` is not a valid HTTP header")]
    InvalidHeader { name: String },

    #[error("invalid config for `{name}`")]
    Invalid {
        name: String,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("failed to access config file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode or decode config")]
    Json(#[from] serde_json::Error),
}

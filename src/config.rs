//! Limiter configuration.
//!
//! [`LimiterConfig`] is the validated, serializable description of one limiter
//! and of how the HTTP adapter should reject requests. It is read and written
//! as JSON; missing fields take their defaults.
//!
//! ```json
//! {
//!   "rate": 10,
//!   "burst": 20,
//!   "enabled": true,
//!   "per_key_limits": true,
//!   "excluded_paths": ["/health"]
//! }
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cores::TokenBucket;
use crate::error::ConfigError;

pub const DEFAULT_RATE: u32 = 10;
pub const DEFAULT_BURST: u32 = 20;
pub const DEFAULT_ERROR_MESSAGE: &str = "Too Many Requests";
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// Configuration for one limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Tokens generated per second.
    pub rate: u32,
    /// Maximum tokens held; the instant burst allowance.
    pub burst: u32,
    /// Accounting window, stored in JSON as integer nanoseconds.
    ///
    /// Kept so existing config files round-trip. Token buckets always refill
    /// per second and do not read it.
    #[serde(with = "window_nanos", skip_serializing_if = "Duration::is_zero")]
    pub window: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// A disabled limiter admits everything.
    pub enabled: bool,
    /// One bucket per request key instead of one shared bucket.
    #[serde(skip_serializing_if = "is_false")]
    pub per_key_limits: bool,
    pub error_message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub excluded_paths: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub excluded_ips: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_headers: BTreeMap<String, String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// `Duration` as signed integer nanoseconds. Negative values are rejected.
mod window_nanos {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(window: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let nanos = i64::try_from(window.as_nanos()).unwrap_or(i64::MAX);
        serializer.serialize_i64(nanos)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let nanos = i64::deserialize(deserializer)?;
        u64::try_from(nanos)
            .map(Duration::from_nanos)
            .map_err(|_| D::Error::custom("window must be non-negative"))
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            rate: DEFAULT_RATE,
            burst: DEFAULT_BURST,
            window: DEFAULT_WINDOW,
            name: None,
            enabled: true,
            per_key_limits: false,
            error_message: DEFAULT_ERROR_MESSAGE.to_owned(),
            excluded_paths: Vec::new(),
            excluded_ips: Vec::new(),
            custom_headers: BTreeMap::new(),
        }
    }
}

impl LimiterConfig {
    /// Starts a [`ConfigBuilder`] from the defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Checks that the values describe a usable token bucket.
    ///
    /// # Returns
    /// * `Ok(())` when `rate > 0`, `burst > 0` and `burst >= rate`
    /// * `Err(ConfigError)` naming the first violated rule
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate == 0 {
            return Err(ConfigError::NonPositiveRate);
        }
        if self.burst == 0 {
            return Err(ConfigError::NonPositiveBurst);
        }
        if self.burst < self.rate {
            return Err(ConfigError::BurstBelowRate {
                rate: self.rate,
                burst: self.burst,
            });
        }
        Ok(())
    }

    /// Decodes and validates a configuration from JSON.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConfigError> {
        let config: LimiterConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Decodes and validates a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = open(path)?;
        let config = Self::from_reader(BufReader::new(file))?;
        info!(path = %path.display(), rate = config.rate, burst = config.burst, "loaded limiter config");
        Ok(config)
    }

    /// Encodes the configuration as indented JSON.
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<(), ConfigError> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Writes the configuration to a JSON file, replacing it if present.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let file = create(path)?;
        let mut writer = BufWriter::new(file);
        self.to_writer(&mut writer)?;
        flush(&mut writer, path)?;
        info!(path = %path.display(), "saved limiter config");
        Ok(())
    }

    /// Builds a fresh, full bucket from this configuration.
    pub fn token_bucket(&self) -> Result<TokenBucket, ConfigError> {
        TokenBucket::try_from(self)
    }
}

impl TryFrom<&LimiterConfig> for TokenBucket {
    type Error = ConfigError;

    fn try_from(config: &LimiterConfig) -> Result<Self, Self::Error> {
        config.validate()?;
        Ok(TokenBucket::new(f64::from(config.rate), f64::from(config.burst)))
    }
}

/// Fluent construction of a [`LimiterConfig`], validated on [`build`](ConfigBuilder::build).
///
/// # Example
///
/// ```rust
/// use rate_gate::config::LimiterConfig;
///
/// let config = LimiterConfig::builder()
///     .rate(5)
///     .burst(10)
///     .name("api")
///     .excluded_paths(["/health"])
///     .build()
///     .unwrap();
/// assert_eq!(config.burst, 10);
///
/// assert!(LimiterConfig::builder().rate(20).burst(10).build().is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: LimiterConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rate(mut self, rate: u32) -> Self {
        self.config.rate = rate;
        self
    }

    pub fn burst(mut self, burst: u32) -> Self {
        self.config.burst = burst;
        self
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.config.window = window;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn per_key_limits(mut self, enabled: bool) -> Self {
        self.config.per_key_limits = enabled;
        self
    }

    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.config.error_message = message.into();
        self
    }

    pub fn excluded_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.excluded_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn excluded_ips<I, S>(mut self, ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.excluded_ips = ips.into_iter().map(Into::into).collect();
        self
    }

    pub fn custom_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.config.custom_headers = headers
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<LimiterConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// A collection of named configurations, stored as one JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigSet {
    configs: BTreeMap<String, LimiterConfig>,
}

impl ConfigSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the configuration called `name` after validating it.
    pub fn add(&mut self, name: impl Into<String>, config: LimiterConfig) -> Result<(), ConfigError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        config.validate().map_err(|source| ConfigError::Invalid {
            name: name.clone(),
            source: Box::new(source),
        })?;
        self.configs.insert(name, config);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&LimiterConfig> {
        self.configs.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<LimiterConfig> {
        self.configs.remove(name)
    }

    /// Returns the configuration names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.configs.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Decodes a JSON object of named configurations and adds each one.
    ///
    /// Stops at the first invalid entry; entries added before it are kept.
    pub fn load_reader<R: Read>(&mut self, reader: R) -> Result<(), ConfigError> {
        let configs: BTreeMap<String, LimiterConfig> = serde_json::from_reader(reader)?;
        for (name, config) in configs {
            self.add(name, config)?;
        }
        Ok(())
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let file = open(path)?;
        self.load_reader(BufReader::new(file))?;
        info!(path = %path.display(), configs = self.configs.len(), "loaded limiter config set");
        Ok(())
    }

    pub fn save_writer<W: Write>(&self, writer: W) -> Result<(), ConfigError> {
        serde_json::to_writer_pretty(writer, &self.configs)?;
        Ok(())
    }

    pub fn save_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let file = create(path)?;
        let mut writer = BufWriter::new(file);
        self.save_writer(&mut writer)?;
        flush(&mut writer, path)
    }
}

fn open(path: &Path) -> Result<File, ConfigError> {
    File::open(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn create(path: &Path) -> Result<File, ConfigError> {
    File::create(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn flush<W: Write>(writer: &mut W, path: &Path) -> Result<(), ConfigError> {
    writer.flush().map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

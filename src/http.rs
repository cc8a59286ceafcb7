//! HTTP request gating on top of the [`http`] crate.
//!
//! The adapter turns a request into a key with a [`KeyFn`], asks a limiter
//! (one shared [`RateLimit`], or a [`KeyedRegistry`] of them) whether the
//! request may proceed, and renders a `429 Too Many Requests` response via a
//! [`Rejection`] when it may not. It is framework agnostic: wire
//! [`HttpRateLimiter::check`] into whatever middleware layer the server uses.
//!
//! ```rust
//! use http::Request;
//! use rate_gate::cores::TokenBucket;
//! use rate_gate::http::{Decision, HttpRateLimiter};
//!
//! let gate = HttpRateLimiter::new(TokenBucket::new(1.0, 1.0));
//! let request = Request::get("/items").body(()).unwrap();
//!
//! assert!(matches!(gate.check(&request), Decision::Allow));
//! match gate.check(&request) {
//!     Decision::Reject(response) => assert_eq!(response.status(), 429),
//!     Decision::Allow => unreachable!(),
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use http::{HeaderMap, Request, Response, StatusCode, Uri};
use tracing::trace;

use crate::clock::{Clock, SystemClock};
use crate::config::LimiterConfig;
use crate::cores::TokenBucket;
use crate::error::{ConfigError, RegistryError};
use crate::rate_limit::RateLimit;
use crate::registry::KeyedRegistry;

/// Key used by [`KeyFn::by_ip`] when no client address is known.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Body of [`Rejection::Json`].
pub const JSON_REJECTION_BODY: &str = r#"{"error":"too many requests","status":429}"#;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// The parts of a request that key functions may look at.
///
/// The remote address is read from the request extensions, where most
/// servers store the peer's [`SocketAddr`].
#[derive(Debug, Clone, Copy)]
pub struct RequestView<'a> {
    pub headers: &'a HeaderMap,
    pub uri: &'a Uri,
    pub remote_addr: Option<SocketAddr>,
}

impl<'a> RequestView<'a> {
    pub fn new(headers: &'a HeaderMap, uri: &'a Uri, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            headers,
            uri,
            remote_addr,
        }
    }

    fn header(&self, name: &str) -> Option<&'a str> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

impl<'a, B> From<&'a Request<B>> for RequestView<'a> {
    fn from(request: &'a Request<B>) -> Self {
        Self {
            headers: request.headers(),
            uri: request.uri(),
            remote_addr: request.extensions().get::<SocketAddr>().copied(),
        }
    }
}

/// A named key-derivation strategy: request in, limiter key out.
#[derive(Clone)]
pub struct KeyFn(Arc<dyn Fn(&RequestView<'_>) -> String + Send + Sync>);

impl KeyFn {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&RequestView<'_>) -> String + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Derives the key for `request`.
    pub fn key(&self, request: &RequestView<'_>) -> String {
        (self.0)(request)
    }

    /// Keys by client IP.
    ///
    /// Uses the first address of `X-Forwarded-For`, then `X-Real-IP`, then the
    /// connection's remote IP, then [`UNKNOWN_CLIENT`].
    pub fn by_ip() -> Self {
        Self::new(client_ip)
    }

    /// Keys by the value of `header`, `"anonymous"` when it is absent.
    pub fn by_user_id(header: impl Into<String>) -> Self {
        Self::by_header(header, "anonymous")
    }

    /// Keys by the value of `header`, `"no-api-key"` when it is absent.
    pub fn by_api_key(header: impl Into<String>) -> Self {
        Self::by_header(header, "no-api-key")
    }

    /// Keys by the request path.
    pub fn by_path() -> Self {
        Self::new(|request| request.uri.path().to_owned())
    }

    /// Keys by the value of `header`, `fallback` when it is absent or empty.
    pub fn by_header(header: impl Into<String>, fallback: impl Into<String>) -> Self {
        let header = header.into().to_ascii_lowercase();
        let fallback = fallback.into();
        Self::new(move |request| {
            request
                .header(&header)
                .map_or_else(|| fallback.clone(), str::to_owned)
        })
    }

    /// Joins the keys of several strategies into one, as `[a b c]`.
    pub fn combine(parts: Vec<KeyFn>) -> Self {
        Self::new(move |request| {
            let keys: Vec<String> = parts.iter().map(|part| part.key(request)).collect();
            format!("[{}]", keys.join(" "))
        })
    }
}

impl Default for KeyFn {
    fn default() -> Self {
        Self::by_ip()
    }
}

impl fmt::Debug for KeyFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyFn(..)")
    }
}

fn client_ip(request: &RequestView<'_>) -> String {
    if let Some(forwarded) = request.header(X_FORWARDED_FOR) {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|ip| !ip.is_empty()) {
            return first.to_owned();
        }
    }
    if let Some(real_ip) = request.header(X_REAL_IP) {
        return real_ip.to_owned();
    }
    request
        .remote_addr
        .map_or_else(|| UNKNOWN_CLIENT.to_owned(), |addr| addr.ip().to_string())
}

/// How a denied request is answered. Always `429 Too Many Requests`.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    /// A plain-text body, plus extra headers.
    PlainText {
        message: String,
        headers: Vec<(HeaderName, HeaderValue)>,
    },
    /// `{"error":"too many requests","status":429}`.
    Json,
}

impl Default for Rejection {
    fn default() -> Self {
        Self::plain(crate::config::DEFAULT_ERROR_MESSAGE)
    }
}

impl Rejection {
    pub fn plain(message: impl Into<String>) -> Self {
        Self::PlainText {
            message: message.into(),
            headers: Vec::new(),
        }
    }

    /// A plain-text rejection with custom headers.
    ///
    /// # Returns
    /// * `Err(ConfigError::InvalidHeader)` if a name or value is not valid HTTP
    pub fn custom(
        message: impl Into<String>,
        headers: &BTreeMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let headers = headers
            .iter()
            .map(|(name, value)| {
                let invalid = || ConfigError::InvalidHeader { name: name.clone() };
                let header_name = HeaderName::try_from(name.as_str()).map_err(|_| invalid())?;
                let header_value = HeaderValue::try_from(value.as_str()).map_err(|_| invalid())?;
                Ok((header_name, header_value))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self::PlainText {
            message: message.into(),
            headers,
        })
    }

    /// Builds the response for a denied request.
    ///
    /// Plain-text replies carry `X-Content-Type-Options: nosniff`. The body is
    /// the message exactly as configured, with no trailing newline appended.
    pub fn render(&self) -> Response<String> {
        let (body, content_type, nosniff, extra) = match self {
            Rejection::PlainText { message, headers } => (
                message.clone(),
                HeaderValue::from_static("text/plain; charset=utf-8"),
                true,
                headers.as_slice(),
            ),
            Rejection::Json => (
                JSON_REJECTION_BODY.to_owned(),
                HeaderValue::from_static("application/json"),
                false,
                &[][..],
            ),
        };

        let mut response = Response::new(body);
        *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        let response_headers = response.headers_mut();
        response_headers.insert(CONTENT_TYPE, content_type);
        if nosniff {
            response_headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        }
        for (name, value) in extra {
            response_headers.insert(name.clone(), value.clone());
        }
        response
    }
}

/// Requests that skip rate limiting entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exclusions {
    /// Exact request paths.
    pub paths: Vec<String>,
    /// Client IPs as derived by [`KeyFn::by_ip`].
    pub ips: Vec<String>,
}

impl Exclusions {
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.ips.is_empty()
    }

    fn matches(&self, request: &RequestView<'_>) -> bool {
        if self.is_empty() {
            return false;
        }
        let path = request.uri.path();
        if self.paths.iter().any(|excluded| excluded == path) {
            return true;
        }
        !self.ips.is_empty() && {
            let ip = client_ip(request);
            self.ips.iter().any(|excluded| *excluded == ip)
        }
    }
}

/// Result of gating one request.
#[derive(Debug)]
pub enum Decision {
    /// Forward the request.
    Allow,
    /// Answer with this response instead.
    Reject(Response<String>),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Gates every request against one shared limiter.
#[derive(Debug)]
pub struct HttpRateLimiter<L> {
    limiter: L,
    rejection: Rejection,
    exclusions: Exclusions,
    enabled: bool,
}

impl<L: RateLimit> HttpRateLimiter<L> {
    pub fn new(limiter: L) -> Self {
        Self {
            limiter,
            rejection: Rejection::default(),
            exclusions: Exclusions::default(),
            enabled: true,
        }
    }

    pub fn with_rejection(mut self, rejection: Rejection) -> Self {
        self.rejection = rejection;
        self
    }

    pub fn with_exclusions(mut self, exclusions: Exclusions) -> Self {
        self.exclusions = exclusions;
        self
    }

    pub fn limiter(&self) -> &L {
        &self.limiter
    }

    /// Decides whether `request` may proceed.
    pub fn check<B>(&self, request: &Request<B>) -> Decision {
        self.check_view(&RequestView::from(request))
    }

    pub fn check_view(&self, request: &RequestView<'_>) -> Decision {
        if !self.enabled || self.exclusions.matches(request) {
            return Decision::Allow;
        }
        if self.limiter.try_acquire() {
            Decision::Allow
        } else {
            trace!(path = request.uri.path(), "request rejected by shared limiter");
            Decision::Reject(self.rejection.render())
        }
    }
}

impl HttpRateLimiter<TokenBucket> {
    /// Builds a gate with one shared bucket from `config`.
    pub fn from_config(config: &LimiterConfig) -> Result<Self, ConfigError> {
        let (rejection, exclusions) = adapter_parts(config)?;
        Ok(Self {
            limiter: config.token_bucket()?,
            rejection,
            exclusions,
            enabled: config.enabled,
        })
    }
}

/// Gates each request against the limiter for its key.
#[derive(Debug)]
pub struct PerKeyHttpRateLimiter<L, C: Clock = SystemClock> {
    registry: KeyedRegistry<L, C>,
    key_fn: KeyFn,
    rejection: Rejection,
    exclusions: Exclusions,
    enabled: bool,
}

impl<L: RateLimit, C: Clock> PerKeyHttpRateLimiter<L, C> {
    /// Gates requests with limiters from `registry`, keyed by client IP.
    pub fn new(registry: KeyedRegistry<L, C>) -> Self {
        Self {
            registry,
            key_fn: KeyFn::default(),
            rejection: Rejection::default(),
            exclusions: Exclusions::default(),
            enabled: true,
        }
    }

    pub fn with_key_fn(mut self, key_fn: KeyFn) -> Self {
        self.key_fn = key_fn;
        self
    }

    pub fn with_rejection(mut self, rejection: Rejection) -> Self {
        self.rejection = rejection;
        self
    }

    pub fn with_exclusions(mut self, exclusions: Exclusions) -> Self {
        self.exclusions = exclusions;
        self
    }

    pub fn registry(&self) -> &KeyedRegistry<L, C> {
        &self.registry
    }

    /// Decides whether `request` may proceed.
    ///
    /// # Returns
    /// * `Err(RegistryError)` if the limiter for a new key could not be created
    pub fn check<B>(&self, request: &Request<B>) -> Result<Decision, RegistryError> {
        self.check_view(&RequestView::from(request))
    }

    pub fn check_view(&self, request: &RequestView<'_>) -> Result<Decision, RegistryError> {
        if !self.enabled || self.exclusions.matches(request) {
            return Ok(Decision::Allow);
        }
        let key = self.key_fn.key(request);
        if self.registry.try_acquire(&key)? {
            Ok(Decision::Allow)
        } else {
            trace!(key = %key, "request rejected by per-key limiter");
            Ok(Decision::Reject(self.rejection.render()))
        }
    }
}

impl PerKeyHttpRateLimiter<TokenBucket> {
    /// Builds a per-key gate from `config`: every key gets its own bucket of
    /// `rate`/`burst`.
    pub fn from_config(config: &LimiterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (rejection, exclusions) = adapter_parts(config)?;
        let (rate, burst) = (f64::from(config.rate), f64::from(config.burst));
        Ok(Self {
            registry: KeyedRegistry::new(move || TokenBucket::new(rate, burst)),
            key_fn: KeyFn::default(),
            rejection,
            exclusions,
            enabled: config.enabled,
        })
    }
}

/// A gate built from configuration: shared or per-key per `per_key_limits`.
#[derive(Debug)]
pub enum ConfiguredHttpLimiter {
    Shared(HttpRateLimiter<TokenBucket>),
    PerKey(PerKeyHttpRateLimiter<TokenBucket>),
}

impl ConfiguredHttpLimiter {
    pub fn from_config(config: &LimiterConfig) -> Result<Self, ConfigError> {
        if config.per_key_limits {
            PerKeyHttpRateLimiter::from_config(config).map(Self::PerKey)
        } else {
            HttpRateLimiter::from_config(config).map(Self::Shared)
        }
    }

    pub fn check<B>(&self, request: &Request<B>) -> Result<Decision, RegistryError> {
        match self {
            Self::Shared(gate) => Ok(gate.check(request)),
            Self::PerKey(gate) => gate.check(request),
        }
    }
}

fn adapter_parts(config: &LimiterConfig) -> Result<(Rejection, Exclusions), ConfigError> {
    let rejection = Rejection::custom(config.error_message.clone(), &config.custom_headers)?;
    let exclusions = Exclusions {
        paths: config.excluded_paths.clone(),
        ips: config.excluded_ips.clone(),
    };
    Ok((rejection, exclusions))
}

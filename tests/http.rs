use std::net::SocketAddr;

use http::header::{CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use http::{Request, StatusCode};
use rate_gate::config::LimiterConfig;
use rate_gate::cores::TokenBucket;
use rate_gate::http::{
    ConfiguredHttpLimiter, Decision, Exclusions, HttpRateLimiter, KeyFn, PerKeyHttpRateLimiter,
    Rejection, RequestView, JSON_REJECTION_BODY, UNKNOWN_CLIENT,
};
use rate_gate::registry::KeyedRegistry;
use rate_gate::ConfigError;

fn request(path: &str, headers: &[(&str, &str)]) -> Request<()> {
    let mut builder = Request::builder().uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(()).unwrap()
}

fn request_from(path: &str, remote: &str) -> Request<()> {
    let mut req = request(path, &[]);
    req.extensions_mut().insert(remote.parse::<SocketAddr>().unwrap());
    req
}

fn key(key_fn: &KeyFn, req: &Request<()>) -> String {
    key_fn.key(&RequestView::from(req))
}

#[test]
fn test_key_by_ip_prefers_forwarded_for() {
    let req = request("/", &[("X-Forwarded-For", "203.0.113.7, 10.0.0.1"), ("X-Real-IP", "198.51.100.2")]);
    assert_eq!(key(&KeyFn::by_ip(), &req), "203.0.113.7");
}

#[test]
fn test_key_by_ip_falls_back_to_real_ip_then_remote_addr() {
    let req = request("/", &[("X-Real-IP", "198.51.100.2")]);
    assert_eq!(key(&KeyFn::by_ip(), &req), "198.51.100.2");

    let req = request_from("/", "192.0.2.10:51234");
    assert_eq!(key(&KeyFn::by_ip(), &req), "192.0.2.10");

    let req = request("/", &[]);
    assert_eq!(key(&KeyFn::by_ip(), &req), UNKNOWN_CLIENT);
}

#[test]
fn test_key_by_header_with_fallbacks() {
    let with_user = request("/", &[("X-User-ID", "user-42"), ("X-API-Key", "secret")]);
    let anonymous = request("/", &[]);

    assert_eq!(key(&KeyFn::by_user_id("X-User-ID"), &with_user), "user-42");
    assert_eq!(key(&KeyFn::by_user_id("X-User-ID"), &anonymous), "anonymous");
    assert_eq!(key(&KeyFn::by_api_key("X-API-Key"), &with_user), "secret");
    assert_eq!(key(&KeyFn::by_api_key("X-API-Key"), &anonymous), "no-api-key");
    assert_eq!(key(&KeyFn::by_header("X-Tenant", "shared"), &anonymous), "shared");
}

#[test]
fn test_key_by_path_and_combination() {
    let req = request_from("/orders/7?page=2", "192.0.2.1:80");
    assert_eq!(key(&KeyFn::by_path(), &req), "/orders/7");

    let combined = KeyFn::combine(vec![KeyFn::by_ip(), KeyFn::by_path()]);
    assert_eq!(key(&combined, &req), "[192.0.2.1 /orders/7]");
}

#[test]
fn test_custom_key_fn() {
    let key_fn = KeyFn::new(|request| format!("method-less:{}", request.uri.path()));
    assert_eq!(key(&key_fn, &request("/x", &[])), "method-less:/x");
}

#[test]
fn test_default_rejection() {
    let response = Rejection::default().render();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.body(), "Too Many Requests");
    assert_eq!(response.headers()[CONTENT_TYPE], "text/plain; charset=utf-8");
    assert_eq!(response.headers()[X_CONTENT_TYPE_OPTIONS], "nosniff");
}

#[test]
fn test_json_rejection() {
    let response = Rejection::Json.render();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.body(), JSON_REJECTION_BODY);
    assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    assert!(response.headers().get(X_CONTENT_TYPE_OPTIONS).is_none());

    let body: serde_json::Value = serde_json::from_str(response.body()).unwrap();
    assert_eq!(body["error"], "too many requests");
    assert_eq!(body["status"], 429);
}

#[test]
fn test_custom_rejection_headers() {
    let headers = [("Retry-After".to_string(), "2".to_string())].into_iter().collect();
    let response = Rejection::custom("Slow down", &headers).unwrap().render();

    assert_eq!(response.body(), "Slow down");
    assert_eq!(response.headers()["retry-after"], "2");

    let bad = [("bad header".to_string(), "x".to_string())].into_iter().collect();
    assert!(matches!(
        Rejection::custom("x", &bad),
        Err(ConfigError::InvalidHeader { name }) if name == "bad header"
    ));
}

#[test]
fn test_shared_limiter_rejects_after_burst() {
    let gate = HttpRateLimiter::new(TokenBucket::new(0.001, 2.0));
    let req = request("/items", &[]);

    assert!(gate.check(&req).is_allowed());
    assert!(gate.check(&req).is_allowed());
    match gate.check(&req) {
        Decision::Reject(response) => assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS),
        Decision::Allow => panic!("Expected rejection"),
    }
}

#[test]
fn test_excluded_paths_and_ips_bypass_limit() {
    let gate = HttpRateLimiter::new(TokenBucket::new(0.001, 1.0)).with_exclusions(Exclusions {
        paths: vec!["/health".to_string()],
        ips: vec!["127.0.0.1".to_string()],
    });

    assert!(gate.check(&request("/items", &[])).is_allowed());
    assert!(!gate.check(&request("/items", &[])).is_allowed());

    for _ in 0..5 {
        assert!(gate.check(&request("/health", &[])).is_allowed());
        assert!(gate.check(&request_from("/items", "127.0.0.1:9000")).is_allowed());
    }
}

#[test]
fn test_per_key_limiter_isolates_clients() {
    let gate = PerKeyHttpRateLimiter::new(KeyedRegistry::new(|| TokenBucket::new(0.001, 1.0)))
        .with_rejection(Rejection::Json);

    let alice = request_from("/", "192.0.2.1:1000");
    let bob = request_from("/", "192.0.2.2:1000");

    assert!(gate.check(&alice).unwrap().is_allowed());
    assert!(gate.check(&bob).unwrap().is_allowed());

    match gate.check(&alice).unwrap() {
        Decision::Reject(response) => assert_eq!(response.body(), JSON_REJECTION_BODY),
        Decision::Allow => panic!("Expected rejection"),
    }
    assert_eq!(gate.registry().len(), 2);
}

#[test]
fn test_per_key_limiter_with_header_key() {
    let gate = PerKeyHttpRateLimiter::new(KeyedRegistry::new(|| TokenBucket::new(0.001, 1.0)))
        .with_key_fn(KeyFn::by_api_key("X-API-Key"));

    let keyed = request("/", &[("X-API-Key", "k1")]);
    assert!(gate.check(&keyed).unwrap().is_allowed());
    assert!(!gate.check(&keyed).unwrap().is_allowed());

    assert!(gate.registry().contains_key("k1"));
    assert!(gate.check(&request("/", &[])).unwrap().is_allowed());
    assert!(gate.registry().contains_key("no-api-key"));
}

#[test]
fn test_per_key_factory_failure_surfaces() {
    let registry = KeyedRegistry::try_new(|| Err::<TokenBucket, _>("no buckets today"));
    let gate = PerKeyHttpRateLimiter::new(registry);
    assert!(gate.check(&request("/", &[])).is_err());
}

#[test]
fn test_from_config_applies_message_and_headers() {
    let config = LimiterConfig::builder()
        .rate(1)
        .burst(1)
        .error_message("Quota exceeded")
        .custom_headers([("Retry-After", "1")])
        .build()
        .unwrap();
    let gate = HttpRateLimiter::from_config(&config).unwrap();
    let req = request("/", &[]);

    assert!(gate.check(&req).is_allowed());
    match gate.check(&req) {
        Decision::Reject(response) => {
            assert_eq!(response.body(), "Quota exceeded");
            assert_eq!(response.headers()["retry-after"], "1");
        }
        Decision::Allow => panic!("Expected rejection"),
    }
}

#[test]
fn test_disabled_config_allows_everything() {
    let config = LimiterConfig::builder().rate(1).burst(1).enabled(false).build().unwrap();
    let gate = ConfiguredHttpLimiter::from_config(&config).unwrap();
    let req = request("/", &[]);

    for _ in 0..10 {
        assert!(gate.check(&req).unwrap().is_allowed());
    }
}

#[test]
fn test_configured_limiter_picks_per_key_mode() {
    let shared = LimiterConfig::builder().rate(1).burst(1).build().unwrap();
    assert!(matches!(
        ConfiguredHttpLimiter::from_config(&shared).unwrap(),
        ConfiguredHttpLimiter::Shared(_)
    ));

    let per_key = LimiterConfig::builder().rate(1).burst(1).per_key_limits(true).build().unwrap();
    let gate = ConfiguredHttpLimiter::from_config(&per_key).unwrap();
    assert!(matches!(gate, ConfiguredHttpLimiter::PerKey(_)));

    let a = request_from("/", "192.0.2.1:1");
    let b = request_from("/", "192.0.2.2:1");
    assert!(gate.check(&a).unwrap().is_allowed());
    assert!(!gate.check(&a).unwrap().is_allowed());
    assert!(gate.check(&b).unwrap().is_allowed());
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = LimiterConfig {
        rate: 0,
        ..LimiterConfig::default()
    };
    assert!(matches!(
        PerKeyHttpRateLimiter::from_config(&config),
        Err(ConfigError::NonPositiveRate)
    ));
}

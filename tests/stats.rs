use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rate_gate::clock::ManualClock;
use rate_gate::cores::{TokenBucket, WaitOptions};
use rate_gate::stats::{Stats, StatsCollector, WithStats};
use rate_gate::{RateLimit, WaitError};

#[test]
fn test_empty_snapshot() {
    let stats = Stats::new();
    let snapshot = stats.snapshot();

    assert_eq!(snapshot.total, 0);
    assert_eq!(snapshot.allowed, 0);
    assert_eq!(snapshot.denied, 0);
    assert_eq!(snapshot.acceptance_ratio, 0.0);
    assert_eq!(snapshot.rate, 0.0);
    assert!(snapshot.last_activity.is_none());
}

#[test]
fn test_counts_and_ratio() {
    let stats = Stats::new();
    for _ in 0..3 {
        stats.record_allowed();
    }
    stats.record_denied();

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.total, 4);
    assert_eq!(snapshot.allowed, 3);
    assert_eq!(snapshot.denied, 1);
    assert_eq!(snapshot.acceptance_ratio, 0.75);
    assert!(snapshot.last_activity.is_some());
    assert!(snapshot.last_activity.unwrap() >= snapshot.started_at);
}

#[test]
fn test_duration_stops_at_last_activity() {
    let stats = Stats::new();
    thread::sleep(Duration::from_millis(20));
    stats.record_allowed();

    let first = stats.snapshot();
    thread::sleep(Duration::from_millis(20));
    let second = stats.snapshot();

    assert!(first.duration >= Duration::from_millis(20));
    assert_eq!(first.duration, second.duration);
    assert!(first.rate > 0.0);
    assert_eq!(first.rate, 1.0 / first.duration.as_secs_f64());
}

#[test]
fn test_concurrent_records_stay_consistent() {
    let stats = Arc::new(Stats::new());

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let stats = Arc::clone(&stats);
            thread::spawn(move || {
                for i in 0..1000 {
                    if (worker + i) % 2 == 0 {
                        stats.record_allowed();
                    } else {
                        stats.record_denied();
                    }
                    if i % 100 == 0 {
                        let snapshot = stats.snapshot();
                        assert_eq!(snapshot.total, snapshot.allowed + snapshot.denied);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.total, 8000);
    assert_eq!(snapshot.allowed, 4000);
    assert_eq!(snapshot.denied, 4000);
    assert_eq!(snapshot.acceptance_ratio, 0.5);
}

#[test]
fn test_reset() {
    let stats = Stats::new();
    let before = stats.snapshot().started_at;
    stats.record_allowed();
    stats.record_denied();

    thread::sleep(Duration::from_millis(5));
    stats.reset();

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.total, 0);
    assert_eq!(snapshot.allowed, 0);
    assert_eq!(snapshot.denied, 0);
    assert!(snapshot.last_activity.is_none());
    assert!(snapshot.started_at > before);
}

#[test]
fn test_decorator_does_not_change_decisions() {
    let clock = ManualClock::new();
    let plain = TokenBucket::with_clock(1.0, 3.0, clock.clone());
    let wrapped = WithStats::new(TokenBucket::with_clock(1.0, 3.0, clock.clone()));

    for _ in 0..5 {
        assert_eq!(plain.try_acquire(), wrapped.try_acquire());
    }
    clock.advance(Duration::from_secs(1));
    assert_eq!(plain.try_acquire(), wrapped.try_acquire());

    let snapshot = wrapped.stats().snapshot();
    assert_eq!(snapshot.allowed, 4);
    assert_eq!(snapshot.denied, 2);
    assert_eq!(snapshot.total, 6);
}

#[test]
fn test_decorator_records_waits() {
    let stats = Arc::new(Stats::new());
    let limiter = WithStats::with_collector(TokenBucket::new(0.5, 1.0), Arc::clone(&stats));

    limiter.wait();
    let result = limiter.wait_with(&WaitOptions::new().timeout(Duration::from_millis(20)));
    assert_eq!(result, Err(WaitError::TimedOut));

    // The timed-out wait is not counted
    let snapshot = stats.snapshot();
    assert_eq!(snapshot.allowed, 1);
    assert_eq!(snapshot.denied, 0);
}

#[test]
fn test_decorator_as_trait_object() {
    let limiter: Arc<dyn RateLimit> = Arc::new(WithStats::new(TokenBucket::new(0.001, 1.0)));
    assert!(limiter.try_acquire());
    assert!(!limiter.try_acquire());
}

#[test]
fn test_snapshot_serializes() {
    let stats = Stats::new();
    stats.record_allowed();

    let json = serde_json::to_value(stats.snapshot()).unwrap();
    assert_eq!(json["total"], 1);
    assert_eq!(json["allowed"], 1);
    assert_eq!(json["denied"], 0);
    assert_eq!(json["acceptance_ratio"], 1.0);
}

//! Drives one shared token bucket from several worker threads, each blocking
//! until admitted, and reports the achieved rate.
//!
//! ```text
//! cargo run --example simulate -- --rate 10 --burst 20 --requests 50 --workers 5
//! ```

use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use clap::Parser;
use rate_gate::cores::TokenBucket;
use rate_gate::stats::{StatsCollector, WithStats};
use rate_gate::RateLimit;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(about = "Simulate rate-limited workers")]
struct Args {
    /// Rate limit (requests per second)
    #[arg(long, default_value_t = 10)]
    rate: u32,
    /// Burst size (maximum tokens)
    #[arg(long, default_value_t = 20)]
    burst: u32,
    /// Number of requests to simulate
    #[arg(long, default_value_t = 50)]
    requests: usize,
    /// Number of concurrent workers
    #[arg(long, default_value_t = 5)]
    workers: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = rate_gate::config::LimiterConfig::builder()
        .rate(args.rate)
        .burst(args.burst)
        .build()?;
    let limiter = Arc::new(WithStats::new(config.token_bucket()?));

    println!("Rate Limiter Configuration:");
    println!("- Rate: {} requests/second", args.rate);
    println!("- Burst: {} tokens", args.burst);
    println!("- Simulating {} requests with {} workers\n", args.requests, args.workers);

    let (sender, receiver) = mpsc::channel();
    for request_id in 1..=args.requests {
        sender.send(request_id)?;
    }
    drop(sender);
    let receiver = Arc::new(Mutex::new(receiver));

    let start = Instant::now();
    let handles: Vec<_> = (0..args.workers)
        .map(|worker_id| {
            let limiter: Arc<WithStats<TokenBucket>> = Arc::clone(&limiter);
            let receiver = Arc::clone(&receiver);
            thread::spawn(move || loop {
                let next = match receiver.lock() {
                    Ok(receiver) => receiver.recv(),
                    Err(_) => return,
                };
                let Ok(request_id) = next else {
                    return;
                };
                limiter.wait();
                println!(
                    "Worker {}: Processing request {} at {}",
                    worker_id,
                    request_id,
                    clock_time()
                );
            })
        })
        .collect();

    for handle in handles {
        if handle.join().is_err() {
            return Err("worker thread panicked".into());
        }
    }
    let elapsed = start.elapsed();

    let snapshot = limiter.stats().snapshot();
    println!("\nCompleted {} requests in {:?}", snapshot.allowed, elapsed);
    println!(
        "Actual rate: {:.2} requests/second",
        snapshot.allowed as f64 / elapsed.as_secs_f64()
    );
    Ok(())
}

/// Wall-clock time of day as `HH:MM:SS.mmm` (UTC).
fn clock_time() -> String {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = since_epoch.as_secs() % 86_400;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        since_epoch.subsec_millis()
    )
}

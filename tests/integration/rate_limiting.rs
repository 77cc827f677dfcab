//! Integration tests for rate limiting functionality

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use media_ingest::downloader::rate_limit::{HOUR, MINUTE};
use media_ingest::downloader::{RateLimitConfig, RateLimitError, RateLimiter};
use media_ingest::shutdown::ShutdownCoordinator;

fn limiter(per_minute: usize, per_hour: usize) -> RateLimiter {
    RateLimiter::new(RateLimitConfig::with_limits(per_minute, per_hour)).unwrap()
}

#[test]
fn test_zero_limits_are_rejected() {
    assert!(matches!(
        RateLimiter::new(RateLimitConfig::with_limits(0, 10)),
        Err(RateLimitError::InvalidConfig(_))
    ));
    assert!(matches!(
        RateLimiter::new(RateLimitConfig::with_limits(10, 0)),
        Err(RateLimitError::InvalidConfig(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_calls_under_capacity_are_not_delayed() {
    let limiter = limiter(5, 100);
    for _ in 0..5 {
        assert_eq!(limiter.admit().await.unwrap(), Duration::ZERO);
    }
    assert_eq!(limiter.stats().await.calls_last_minute, 5);
}

#[tokio::test(start_paused = true)]
async fn test_minute_window_bounds_any_trailing_interval() {
    let limiter = limiter(5, 100);
    let start = Instant::now();

    let mut admitted = Vec::new();
    for _ in 0..10 {
        limiter.admit().await.unwrap();
        admitted.push(Instant::now());
    }

    // The tenth call cannot go out before the first has aged out.
    assert!(admitted[9] - start >= MINUTE);
    for i in 0..5 {
        assert!(
            admitted[i + 5] - admitted[i] >= MINUTE,
            "calls {} and {} were {:?} apart",
            i,
            i + 5,
            admitted[i + 5] - admitted[i]
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_hour_window_applies_independently() {
    let limiter = limiter(100, 3);
    for _ in 0..3 {
        limiter.admit().await.unwrap();
    }

    let waited = limiter.admit().await.unwrap();
    assert!(waited >= HOUR, "waited only {waited:?}");
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_one_quota() {
    let limiter = Arc::new(limiter(3, 100));
    let start = Instant::now();

    let tasks: Vec<_> = (0..6)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter.admit().await.unwrap();
                Instant::now()
            })
        })
        .collect();

    let mut admitted = Vec::new();
    for task in tasks {
        admitted.push(task.await.unwrap());
    }
    admitted.sort();

    assert!(admitted[..3].iter().all(|t| *t - start < MINUTE));
    for i in 0..3 {
        assert!(admitted[i + 3] - admitted[i] >= MINUTE);
    }
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_up_to_the_ceiling() {
    let limiter = limiter(100, 1000);
    let config = *limiter.config();

    let mut previous = Duration::ZERO;
    for _ in 0..10 {
        let slept = limiter.report_outcome(false).await;
        assert!(slept >= previous);
        assert!(slept <= config.backoff_ceiling);
        previous = slept;
    }
    assert_eq!(limiter.backoff(), config.backoff_ceiling);

    assert_eq!(limiter.report_outcome(true).await, Duration::ZERO);
    assert_eq!(limiter.backoff(), config.backoff_floor);
}

#[tokio::test(start_paused = true)]
async fn test_failure_penalty_applies_to_every_caller() {
    let limiter = Arc::new(limiter(100, 1000));

    let reporter = tokio::spawn({
        let limiter = limiter.clone();
        async move { limiter.report_outcome(false).await }
    });
    tokio::task::yield_now().await;

    // Another caller admitted while the penalty is running waits it out.
    let waited = limiter.admit().await.unwrap();
    let penalty = reporter.await.unwrap();
    assert!(waited >= penalty, "waited {waited:?}, penalty {penalty:?}");
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_a_pending_admission() {
    let shutdown = ShutdownCoordinator::shared();
    let limiter = Arc::new(limiter(1, 10).with_shutdown(shutdown.clone()));
    limiter.admit().await.unwrap();

    let waiter = tokio::spawn({
        let limiter = limiter.clone();
        async move { limiter.admit().await }
    });
    tokio::time::sleep(Duration::from_secs(5)).await;
    shutdown.request_shutdown();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("admission did not observe shutdown")
        .unwrap();
    assert_eq!(result, Err(RateLimitError::Cancelled));
    // A cancelled admission is not counted.
    assert_eq!(limiter.stats().await.calls_last_minute, 1);
}

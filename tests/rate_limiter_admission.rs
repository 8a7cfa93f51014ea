//! Integration tests for sliding-window admission
//!
//! Runs on a paused tokio clock so window ageing is deterministic.

use std::sync::Arc;
use std::time::Duration;
use tierdispatch::config::LimiterConfig;
use tierdispatch::error::DispatchError;
use tierdispatch::limiter::RateLimiter;
use tokio::time::Instant;

fn limiter(rps: u32, concurrent: u32, burst: u32) -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(LimiterConfig {
        max_requests_per_second: rps,
        max_concurrent: concurrent,
        cooldown_ms: 1000,
        burst_allowance: burst,
        admission_timeout_ms: 30_000,
    }))
}

/// 5 rps + burst 2 lets exactly 7 through in the first second, the other
/// three wait for the window to age out.
#[tokio::test(start_paused = true)]
async fn test_ten_waiters_admit_seven_in_first_window() {
    let limiter = limiter(5, 3, 2);
    let start = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let limiter = Arc::clone(&limiter);
        handles.push(tokio::spawn(async move {
            limiter.wait_for_slot().await.expect("slot granted");
            let admitted_at = start.elapsed();
            limiter.release_slot().await;
            admitted_at
        }));
    }

    let mut admitted = Vec::new();
    for handle in handles {
        admitted.push(handle.await.unwrap());
    }

    let first_window = admitted
        .iter()
        .filter(|t| **t < Duration::from_millis(1000))
        .count();
    assert_eq!(first_window, 7, "admission times: {admitted:?}");
    assert_eq!(admitted.len(), 10);
    assert!(
        admitted
            .iter()
            .all(|t| *t < Duration::from_millis(2000))
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_cap_blocks_until_release() {
    let limiter = limiter(100, 2, 0);

    limiter.wait_for_slot().await.unwrap();
    limiter.wait_for_slot().await.unwrap();
    assert!(!limiter.can_proceed().await);

    let waiter = {
        let limiter = Arc::clone(&limiter);
        tokio::spawn(async move {
            let start = Instant::now();
            limiter.wait_for_slot().await.unwrap();
            start.elapsed()
        })
    };

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!waiter.is_finished());

    limiter.release_slot().await;
    let waited = waiter.await.unwrap();
    assert!(waited >= Duration::from_millis(250));
    assert!(waited < Duration::from_millis(500));

    let snapshot = limiter.snapshot().await;
    assert_eq!(snapshot.active, 2);
    assert_eq!(snapshot.max_concurrent, 2);
}

#[tokio::test(start_paused = true)]
async fn test_admission_times_out_when_window_stays_full() {
    let limiter = Arc::new(RateLimiter::new(LimiterConfig {
        max_requests_per_second: 1,
        max_concurrent: 1,
        cooldown_ms: 100,
        burst_allowance: 0,
        admission_timeout_ms: 500,
    }));

    limiter.wait_for_slot().await.unwrap();

    let err = limiter.wait_for_slot().await.unwrap_err();
    match err {
        DispatchError::RateLimitTimeout { waited_ms } => {
            assert!((500..600).contains(&waited_ms), "waited {waited_ms}ms");
        }
        other => panic!("expected RateLimitTimeout, got {other:?}"),
    }

    // The timed-out waiter holds nothing
    assert_eq!(limiter.snapshot().await.active, 1);
}

#[tokio::test(start_paused = true)]
async fn test_release_never_goes_negative() {
    let limiter = limiter(10, 5, 2);
    limiter.release_slot().await;
    limiter.release_slot().await;
    assert_eq!(limiter.snapshot().await.active, 0);

    limiter.wait_for_slot().await.unwrap();
    assert_eq!(limiter.snapshot().await.active, 1);
}

#[tokio::test(start_paused = true)]
async fn test_window_ages_out_after_one_second() {
    let limiter = limiter(2, 10, 0);
    assert!(limiter.try_acquire().await);
    assert!(limiter.try_acquire().await);
    assert!(!limiter.try_acquire().await);

    let snapshot = limiter.snapshot().await;
    assert_eq!(snapshot.requests_last_second, 2);
    assert!((snapshot.rate_utilization - 1.0).abs() < f64::EPSILON);

    tokio::time::advance(Duration::from_millis(999)).await;
    assert!(!limiter.can_proceed().await);

    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(limiter.can_proceed().await);
    assert_eq!(limiter.snapshot().await.requests_last_second, 0);
}

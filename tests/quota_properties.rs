//! Window ceiling properties of the rate limiter under a controlled clock

use memoryops_proxy::quota::{MockClock, QuotaResource, RateLimitConfig, RateLimiter};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn limiter(requests: i64, tokens: i64) -> (Arc<RateLimiter>, MockClock) {
    let clock = MockClock::starting_now();
    let config = RateLimitConfig {
        requests_per_minute: requests,
        tokens_per_minute: tokens,
        idle_eviction_windows: None,
    };
    let limiter = RateLimiter::with_clock(config, Arc::new(clock.clone()));
    (Arc::new(limiter), clock)
}

#[test]
fn test_concurrent_callers_never_exceed_request_ceiling() {
    let (limiter, _clock) = limiter(25, 0);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            thread::spawn(move || (0..20).filter(|_| limiter.check("shared", 1).is_ok()).count())
        })
        .collect();

    let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(admitted, 25);
    assert_eq!(limiter.usage("shared").requests, 25);
}

#[test]
fn test_concurrent_callers_never_exceed_token_ceiling() {
    let (limiter, _clock) = limiter(0, 1_000);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            thread::spawn(move || {
                (0..100)
                    .filter(|_| limiter.check("shared", 7).is_ok())
                    .count()
            })
        })
        .collect();

    let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(admitted, 1_000 / 7);
    assert!(limiter.usage("shared").tokens <= 1_000);
}

#[test]
fn test_window_slides_continuously() {
    let (limiter, clock) = limiter(3, 0);

    // Admissions at t=0, 20, 40
    for _ in 0..3 {
        limiter.check("user", 1).unwrap();
        clock.advance(Duration::from_secs(20));
    }

    // t=60: the t=0 admission has just left the window
    assert!(limiter.check("user", 1).is_ok());

    // t=61: window still holds t=20, 40, 60
    clock.advance(Duration::from_secs(1));
    let err = limiter.check("user", 1).unwrap_err();
    assert_eq!(err.resource, QuotaResource::Requests);

    // t=80: t=20 expires
    clock.advance(Duration::from_secs(19));
    assert!(limiter.check("user", 1).is_ok());
}

#[test]
fn test_request_ceiling_is_checked_before_tokens() {
    let (limiter, _clock) = limiter(1, 10);
    limiter.check("user", 10).unwrap();

    // Both ceilings are exhausted; the request ceiling is reported
    let err = limiter.check("user", 10).unwrap_err();
    assert_eq!(err.resource, QuotaResource::Requests);
}

#[test]
fn test_oversized_charge_rejected_on_empty_window() {
    let (limiter, _clock) = limiter(0, 100);
    let err = limiter.check("user", 101).unwrap_err();
    assert_eq!(err.resource, QuotaResource::Tokens);
    assert_eq!(err.retry_after, Duration::from_secs(60));
    assert_eq!(limiter.usage("user").requests, 0);
}

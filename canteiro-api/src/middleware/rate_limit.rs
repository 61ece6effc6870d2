/// Rate limiting for the identification functions
///
/// `verify-qr-code` and `process-biometric` resolve people from scanned input, so each
/// company gets a token bucket: `IDENTIFY_RATE_PER_MINUTE` tokens of burst capacity,
/// refilled continuously at the same rate per minute. Buckets live in process memory;
/// with several API replicas each enforces its own share.
///
/// # Algorithm
///
/// - Tokens refill at constant rate
/// - Each request consumes 1 token
/// - Request blocked if bucket empty, with `Retry-After` set to the wait in seconds

use crate::app::AppState;
use crate::error::ApiError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use canteiro_shared::auth::middleware::AuthContext;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use uuid::Uuid;

/// Buckets idle for this long are dropped on the next sweep
const IDLE_SECS: f64 = 600.0;

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, now: Instant) -> Self {
        Self {
            tokens: f64::from(capacity),
            last_refill: now,
        }
    }

    fn refill(&mut self, rate: f64, capacity: u32, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(f64::from(capacity));
        self.last_refill = now;
    }

    fn try_consume(&mut self) -> bool {
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn seconds_until_available(&self, rate: f64) -> u64 {
        let deficit = 1.0 - self.tokens;
        if deficit <= 0.0 {
            0
        } else {
            (deficit / rate).ceil().max(1.0) as u64
        }
    }
}

/// Per-company token buckets
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    /// Tokens per second
    rate: f64,
    buckets: Mutex<HashMap<Uuid, TokenBucket>>,
}

impl RateLimiter {
    pub fn per_minute(requests: u32) -> Self {
        let capacity = requests.max(1);
        Self {
            capacity,
            rate: f64::from(capacity) / 60.0,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Takes a token for the company, or returns the seconds to wait
    pub fn check(&self, company_id: Uuid) -> Result<(), u64> {
        self.check_at(company_id, Instant::now())
    }

    fn check_at(&self, company_id: Uuid, now: Instant) -> Result<(), u64> {
        // A poisoned lock only means another request panicked mid-update; the map is still usable
        let mut buckets = self.buckets.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if buckets.len() > 1024 {
            buckets.retain(|_, bucket| now.saturating_duration_since(bucket.last_refill).as_secs_f64() < IDLE_SECS);
        }

        let bucket = buckets
            .entry(company_id)
            .or_insert_with(|| TokenBucket::new(self.capacity, now));
        bucket.refill(self.rate, self.capacity, now);

        if bucket.try_consume() {
            Ok(())
        } else {
            Err(bucket.seconds_until_available(self.rate))
        }
    }
}

/// Rate limiting middleware; must run after JWT authentication
pub async fn identify_rate_limit(
    State(state): State<AppState>,
    auth: AuthContext,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Err(retry_after) = state.rate_limiter.check(auth.company_id) {
        tracing::warn!(company_id = %auth.company_id, retry_after, "Identification rate limit exceeded");
        return Err(ApiError::RateLimitExceeded {
            retry_after,
            message: "Too many identification attempts, try again shortly".to_string(),
        });
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_token_bucket_refill() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(10, start);
        bucket.tokens = 0.0;

        bucket.refill(1.0, 10, start + Duration::from_secs(5));
        assert!((bucket.tokens - 5.0).abs() < 0.01);

        bucket.refill(1.0, 10, start + Duration::from_secs(60));
        assert_eq!(bucket.tokens, 10.0);
    }

    #[test]
    fn test_seconds_until_available() {
        let mut bucket = TokenBucket::new(10, Instant::now());
        assert_eq!(bucket.seconds_until_available(0.5), 0);

        bucket.tokens = 0.0;
        assert_eq!(bucket.seconds_until_available(0.5), 2);

        bucket.tokens = 0.9;
        assert_eq!(bucket.seconds_until_available(10.0), 1);
    }

    #[test]
    fn test_limiter_blocks_after_burst() {
        let limiter = RateLimiter::per_minute(3);
        let company = Uuid::new_v4();
        let now = Instant::now();

        for _ in 0..3 {
            assert!(limiter.check_at(company, now).is_ok());
        }
        // 3 per minute refills one token every 20 seconds
        assert_eq!(limiter.check_at(company, now), Err(20));
        assert!(limiter.check_at(company, now + Duration::from_secs(21)).is_ok());
    }

    #[test]
    fn test_companies_have_separate_buckets() {
        let limiter = RateLimiter::per_minute(1);
        let now = Instant::now();

        assert!(limiter.check_at(Uuid::new_v4(), now).is_ok());
        assert!(limiter.check_at(Uuid::new_v4(), now).is_ok());
    }
}

//! Per-route request gate fed by Discord's `X-RateLimit-*` response headers.
//!
//! When a route reports no remaining requests, the next call on that route
//! waits for the bucket to reset instead of earning a 429.

use reqwest::header::HeaderMap;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const REMAINING: &str = "x-ratelimit-remaining";
const RESET_AFTER: &str = "x-ratelimit-reset-after";

#[derive(Debug, Default)]
pub struct RateLimiter {
    blocked_until: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    /// Time left before `route` may be called again.
    pub fn delay(&self, route: &str) -> Option<Duration> {
        let blocked = self
            .blocked_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        blocked
            .get(route)
            .and_then(|until| until.checked_duration_since(Instant::now()))
            .filter(|d| !d.is_zero())
    }

    /// Wait until `route` has capacity.
    pub async fn acquire(&self, route: &str) {
        if let Some(wait) = self.delay(route) {
            debug!("Route {} exhausted, waiting {:?}", route, wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Record the bucket state a response reported for `route`.
    pub fn update(&self, route: &str, headers: &HeaderMap) {
        let remaining = header_f64(headers, REMAINING);
        let reset_after = header_f64(headers, RESET_AFTER);
        match (remaining, reset_after) {
            (Some(r), Some(reset)) if r <= 0.0 => {
                self.block(route, Duration::from_secs_f64(reset.max(0.0)))
            }
            (Some(_), _) => {
                self.blocked_until
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(route);
            }
            _ => {}
        }
    }

    /// Hold `route` closed for `wait`.
    pub fn block(&self, route: &str, wait: Duration) {
        self.blocked_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(route.to_string(), Instant::now() + wait);
    }
}

fn header_f64(headers: &HeaderMap, name: &str) -> Option<f64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(remaining: &'static str, reset_after: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(REMAINING, HeaderValue::from_static(remaining));
        headers.insert(RESET_AFTER, HeaderValue::from_static(reset_after));
        headers
    }

    #[test]
    fn exhausted_bucket_blocks_its_route_only() {
        let limiter = RateLimiter::default();
        limiter.update("PATCH /channels/1/messages", &headers("0", "2.5"));

        let wait = limiter.delay("PATCH /channels/1/messages").unwrap();
        assert!(wait > Duration::from_secs(2) && wait <= Duration::from_millis(2500));
        assert!(limiter.delay("PATCH /channels/2/messages").is_none());
    }

    #[test]
    fn remaining_capacity_clears_the_block() {
        let limiter = RateLimiter::default();
        limiter.block("POST /channels/1/messages", Duration::from_secs(5));
        assert!(limiter.delay("POST /channels/1/messages").is_some());

        limiter.update("POST /channels/1/messages", &headers("4", "1.0"));
        assert!(limiter.delay("POST /channels/1/messages").is_none());
    }

    #[test]
    fn responses_without_headers_change_nothing() {
        let limiter = RateLimiter::default();
        limiter.block("r", Duration::from_secs(5));
        limiter.update("r", &HeaderMap::new());
        assert!(limiter.delay("r").is_some());
    }

    #[tokio::test]
    async fn acquire_returns_immediately_when_open() {
        let limiter = RateLimiter::default();
        tokio::time::timeout(Duration::from_millis(100), limiter.acquire("r"))
            .await
            .unwrap();
    }
}

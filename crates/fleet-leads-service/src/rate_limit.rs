//! Per-client, per-route sliding-window limiter.
//!
//! Buckets live for the lifetime of the process and are only pruned when the
//! same (client, route) pair is checked again.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutePolicy {
    pub route: &'static str,
    pub limit: usize,
    pub window: Duration,
    pub message: &'static str,
}

pub const LOGIN_POLICY: RoutePolicy = RoutePolicy {
    route: "login",
    limit: 10,
    window: WINDOW,
    message: "Too many login attempts.",
};

pub const LEADS_POLICY: RoutePolicy = RoutePolicy {
    route: "leads",
    limit: 6,
    window: WINDOW,
    message: "Too many lead submissions. Please try again shortly.",
};

pub const EVENTS_POLICY: RoutePolicy = RoutePolicy {
    route: "events",
    limit: 120,
    window: WINDOW,
    message: "Too many events.",
};

pub const SNAPSHOT_POLICY: RoutePolicy = RoutePolicy {
    route: "snapshot",
    limit: 60,
    window: WINDOW,
    message: "Too many requests.",
};

#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<(String, &'static str), Vec<Instant>>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(&self, client: &str, policy: &RoutePolicy) -> bool {
        self.allow_at(client, policy, Instant::now())
    }

    /// Records a hit and returns `true` when fewer than `policy.limit` hits
    /// for this pair fall inside the trailing window. A rejected call does
    /// not consume a slot.
    pub fn allow_at(&self, client: &str, policy: &RoutePolicy, now: Instant) -> bool {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let hits = buckets
            .entry((client.to_string(), policy.route))
            .or_default();
        hits.retain(|hit| now.saturating_duration_since(*hit) < policy.window);

        if hits.len() >= policy.limit {
            tracing::debug!(
                client,
                route = policy.route,
                hits = hits.len(),
                limit = policy.limit,
                "rate limit exceeded"
            );
            return false;
        }

        hits.push(now);
        true
    }

    #[must_use]
    pub fn tracked_buckets(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIGHT: RoutePolicy = RoutePolicy {
        route: "test",
        limit: 3,
        window: Duration::from_secs(60),
        message: "slow down",
    };

    #[test]
    fn request_after_limit_is_rejected_until_window_elapses() {
        let limiter = RateLimiter::new();
        let start = Instant::now();

        for offset in 0..3 {
            assert!(limiter.allow_at("10.0.0.1", &TIGHT, start + Duration::from_secs(offset)));
        }
        assert!(!limiter.allow_at("10.0.0.1", &TIGHT, start + Duration::from_secs(10)));

        // the first hit ages out at exactly start + 60s
        assert!(limiter.allow_at("10.0.0.1", &TIGHT, start + Duration::from_secs(60)));
        assert!(!limiter.allow_at("10.0.0.1", &TIGHT, start + Duration::from_secs(60)));
    }

    #[test]
    fn rejected_requests_do_not_extend_the_window() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        for _ in 0..3 {
            assert!(limiter.allow_at("client", &TIGHT, start));
        }
        for seconds in 1..30 {
            assert!(!limiter.allow_at("client", &TIGHT, start + Duration::from_secs(seconds)));
        }
        assert!(limiter.allow_at("client", &TIGHT, start + Duration::from_secs(61)));
    }

    #[test]
    fn buckets_are_per_client_and_route() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        for _ in 0..3 {
            assert!(limiter.allow_at("a", &TIGHT, now));
        }
        assert!(!limiter.allow_at("a", &TIGHT, now));
        assert!(limiter.allow_at("b", &TIGHT, now));
        assert!(limiter.allow_at("a", &LOGIN_POLICY, now));
        assert_eq!(limiter.tracked_buckets(), 3);
    }

    #[test]
    fn route_limits_match_public_contract() {
        assert_eq!(LOGIN_POLICY.limit, 10);
        assert_eq!(LEADS_POLICY.limit, 6);
        assert_eq!(EVENTS_POLICY.limit, 120);
        assert_eq!(SNAPSHOT_POLICY.limit, 60);
    }
}

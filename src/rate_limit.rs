use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window: Duration,
    /// Drop idle identities every N admission checks.
    pub cleanup_interval: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 5,
            window: Duration::seconds(60),
            cleanup_interval: 100,
        }
    }
}

/// Per-identity sliding-window admission control.
///
/// One mutex guards the whole map, so the filter, count and record steps of
/// an admission check happen atomically and two concurrent checks for the
/// same identity can never both observe a free slot.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
    checks: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
            checks: AtomicU64::new(0),
        }
    }

    /// Admits and records `now` if fewer than `max_requests` admissions for
    /// `identity` are younger than the window. Rejections are not recorded.
    pub fn admit(&self, identity: &str, now: DateTime<Utc>) -> bool {
        let count = self.checks.fetch_add(1, Ordering::Relaxed);
        if count > 0 && self.config.cleanup_interval > 0 && count % self.config.cleanup_interval == 0
        {
            debug!(checks = count, "running rate limiter cleanup");
            self.cleanup(now);
        }

        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let window = windows.entry(identity.to_string()).or_default();

        while let Some(oldest) = window.front() {
            if now - *oldest >= self.config.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.config.max_requests {
            warn!(
                identity,
                requests = window.len(),
                max = self.config.max_requests,
                "rate limit exceeded"
            );
            return false;
        }

        window.push_back(now);
        true
    }

    pub fn admit_now(&self, identity: &str) -> bool {
        self.admit(identity, Utc::now())
    }

    /// Removes identities with no admissions younger than the window.
    pub fn cleanup(&self, now: DateTime<Utc>) {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        windows.retain(|_, window| {
            window.retain(|t| now - *t < self.config.window);
            !window.is_empty()
        });
    }

    #[cfg(test)]
    pub fn tracked_identities(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn limiter(max_requests: usize) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests,
            ..Default::default()
        })
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn admits_up_to_ceiling_then_rejects() {
        let limiter = limiter(5);
        for i in 0..5 {
            assert!(limiter.admit("amy", at(i)));
        }
        assert!(!limiter.admit("amy", at(5)));
        assert!(!limiter.admit("amy", at(59)));
    }

    #[test]
    fn sixth_is_admitted_once_oldest_ages_out() {
        let limiter = limiter(5);
        for i in 0..5 {
            assert!(limiter.admit("amy", at(i * 10)));
        }
        assert!(!limiter.admit("amy", at(59)));
        // oldest entry (t=0) is exactly 60s old here
        assert!(limiter.admit("amy", at(60)));
        assert!(!limiter.admit("amy", at(61)));
    }

    #[test]
    fn rejected_attempts_do_not_consume_quota() {
        let limiter = limiter(2);
        assert!(limiter.admit("amy", at(0)));
        assert!(limiter.admit("amy", at(1)));
        for s in 2..50 {
            assert!(!limiter.admit("amy", at(s)));
        }
        assert!(limiter.admit("amy", at(60)));
        assert!(limiter.admit("amy", at(61)));
    }

    #[test]
    fn identities_are_tracked_separately() {
        let limiter = limiter(1);
        assert!(limiter.admit("amy", at(0)));
        assert!(!limiter.admit("amy", at(1)));
        assert!(limiter.admit("ben", at(1)));
        assert!(!limiter.admit("ben", at(2)));
    }

    #[test]
    fn burst_never_exceeds_ceiling_in_any_window() {
        let limiter = limiter(5);
        let mut admitted = Vec::new();
        for half_secs in 0..400 {
            let now = at(0) + Duration::milliseconds(half_secs * 500);
            if limiter.admit("amy", now) {
                admitted.push(now);
            }
        }
        for (i, start) in admitted.iter().enumerate() {
            let in_window = admitted[i..]
                .iter()
                .take_while(|t| **t - *start < Duration::seconds(60))
                .count();
            assert!(in_window <= 5, "{} admissions within 60s", in_window);
        }
    }

    #[test]
    fn concurrent_checks_for_one_identity_respect_ceiling() {
        let limiter = Arc::new(limiter(5));
        let now = at(0);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                thread::spawn(move || limiter.admit("amy", now))
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 5);
    }

    #[test]
    fn cleanup_drops_idle_identities() {
        let limiter = limiter(5);
        limiter.admit("amy", at(0));
        limiter.admit("ben", at(30));
        assert_eq!(limiter.tracked_identities(), 2);
        limiter.cleanup(at(70));
        assert_eq!(limiter.tracked_identities(), 1);
        limiter.cleanup(at(120));
        assert_eq!(limiter.tracked_identities(), 0);
    }

    #[test]
    fn periodic_cleanup_runs_during_admission() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 5,
            window: Duration::seconds(60),
            cleanup_interval: 3,
        });
        for i in 0..3 {
            limiter.admit(&format!("kid{}", i), at(0));
        }
        assert_eq!(limiter.tracked_identities(), 3);
        // fourth check triggers cleanup before recording
        limiter.admit("late", at(100));
        assert_eq!(limiter.tracked_identities(), 1);
    }
}

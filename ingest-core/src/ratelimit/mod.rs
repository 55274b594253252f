//! Sliding-window-log rate limiter (spec §4.6, C6).
//!
//! Each (tenant, bucket) key owns a chronologically-ordered log of
//! admission timestamps, behind its own lock, following the same
//! `Arc<RwLock<HashMap<..>>>` idiom used throughout the pipeline trackers —
//! updates to one key are serialized, keys are independent.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};

use crate::config::{TierQuota, ADMIN_QUOTA, ADMIN_WINDOW, WEBHOOK_QUOTA, WEBHOOK_WINDOW};
use crate::models::{Bucket, Tier};

/// Outcome of an admission check (spec §6's rate-limit headers).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time (from the same monotonic clock as `Instant::now()`) at which
    /// the oldest counted entry will have aged out of the window.
    pub reset: Instant,
}

struct Counter {
    log: VecDeque<Instant>,
}

impl Counter {
    fn new() -> Self {
        Self {
            log: VecDeque::new(),
        }
    }

    /// Drop entries older than `now - window`, then admit iff under quota.
    fn admit(&mut self, now: Instant, window: Duration, quota: u32) -> Admission {
        while let Some(&oldest) = self.log.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.log.pop_front();
            } else {
                break;
            }
        }

        let count = self.log.len() as u32;
        if count < quota {
            self.log.push_back(now);
            Admission {
                allowed: true,
                limit: quota,
                remaining: quota - count - 1,
                reset: self
                    .log
                    .front()
                    .map(|t| *t + window)
                    .unwrap_or(now + window),
            }
        } else {
            let reset = self.log.front().copied().unwrap_or(now) + window;
            Admission {
                allowed: false,
                limit: quota,
                remaining: 0,
                reset,
            }
        }
    }
}

fn bucket_quota(bucket: Bucket, tier: Tier) -> (u32, Duration) {
    match bucket {
        Bucket::Api => {
            let q = tier_quota(tier);
            (q.api_quota, q.api_window)
        }
        Bucket::Files => {
            let q = tier_quota(tier);
            (q.files_quota, q.files_window)
        }
        Bucket::Webhook => (WEBHOOK_QUOTA, WEBHOOK_WINDOW),
        Bucket::Admin => (ADMIN_QUOTA, ADMIN_WINDOW),
    }
}

fn tier_quota(tier: Tier) -> TierQuota {
    match tier {
        Tier::Free => TierQuota::FREE,
        Tier::Pro => TierQuota::PRO,
        Tier::Enterprise => TierQuota::ENTERPRISE,
    }
}

/// The process-wide rate limiter singleton (spec §9).
#[derive(Clone)]
pub struct RateLimiter {
    counters: Arc<RwLock<HashMap<(String, Bucket), Arc<Mutex<Counter>>>>>,
    fail_open: bool,
}

impl RateLimiter {
    pub fn new(fail_open: bool) -> Self {
        Self {
            counters: Arc::new(RwLock::new(HashMap::new())),
            fail_open,
        }
    }

    async fn counter_for(&self, identity: &str, bucket: Bucket) -> Arc<Mutex<Counter>> {
        {
            let counters = self.counters.read().await;
            if let Some(c) = counters.get(&(identity.to_string(), bucket)) {
                return c.clone();
            }
        }
        let mut counters = self.counters.write().await;
        counters
            .entry((identity.to_string(), bucket))
            .or_insert_with(|| Arc::new(Mutex::new(Counter::new())))
            .clone()
    }

    /// Check and, on success, record one admission for `identity` in
    /// `bucket` at the given tier. This is the single entry point ingress
    /// calls before accepting a request or upload (spec §4.6).
    pub async fn admit(&self, identity: &str, bucket: Bucket, tier: Tier) -> Admission {
        let (quota, window) = bucket_quota(bucket, tier);
        let counter = self.counter_for(identity, bucket).await;
        let mut counter = counter.lock().await;
        counter.admit(Instant::now(), window, quota)
    }

    /// Fail-open wrapper: if the caller represents backend unavailability
    /// (e.g. the limiter's storage is unreachable), this returns an
    /// always-allowed admission when configured fail-open, per §4.6/§9's
    /// documented availability trade-off.
    pub fn admit_on_backend_failure(&self, bucket: Bucket, tier: Tier) -> Admission {
        let (quota, window) = bucket_quota(bucket, tier);
        if self.fail_open {
            tracing::warn!(?bucket, "rate limiter backend unavailable, failing open");
            Admission {
                allowed: true,
                limit: quota,
                remaining: quota,
                reset: Instant::now() + window,
            }
        } else {
            Admission {
                allowed: false,
                limit: quota,
                remaining: 0,
                reset: Instant::now() + window,
            }
        }
    }

    /// Remove a key's counter once its log has drained to empty (spec §3
    /// lifecycle: "key is reaped when empty").
    pub async fn reap_empty(&self, identity: &str, bucket: Bucket) {
        let is_empty = {
            let counters = self.counters.read().await;
            match counters.get(&(identity.to_string(), bucket)) {
                Some(c) => c.lock().await.log.is_empty(),
                None => return,
            }
        };
        if is_empty {
            self.counters
                .write()
                .await
                .remove(&(identity.to_string(), bucket));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_quota_then_denies() {
        let limiter = RateLimiter::new(true);
        for _ in 0..100 {
            let admission = limiter.admit("user-1", Bucket::Api, Tier::Free).await;
            assert!(admission.allowed);
        }
        let denied = limiter.admit("user-1", Bucket::Api, Tier::Free).await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.limit, 100);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = RateLimiter::new(true);
        for _ in 0..100 {
            assert!(limiter.admit("user-1", Bucket::Api, Tier::Free).await.allowed);
        }
        assert!(limiter.admit("user-2", Bucket::Api, Tier::Free).await.allowed);
    }

    #[tokio::test]
    async fn webhook_bucket_is_fixed_across_tiers() {
        let limiter = RateLimiter::new(true);
        for _ in 0..WEBHOOK_QUOTA {
            assert!(
                limiter
                    .admit("user-1", Bucket::Webhook, Tier::Enterprise)
                    .await
                    .allowed
            );
        }
        assert!(
            !limiter
                .admit("user-1", Bucket::Webhook, Tier::Enterprise)
                .await
                .allowed
        );
    }
}

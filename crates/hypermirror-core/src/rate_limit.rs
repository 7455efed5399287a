//! Weighted sliding-window admission control for inbound requests.
//!
//! Each source has its own limiter. A limiter keeps one window of weighted
//! entries per identity key (usually the caller IP). On every check entries
//! older than the window are dropped and the request is admitted only if the
//! remaining weight plus the request weight stays within the per-minute cap.
//!
//! This gate is independent of the circuit breaker: the breaker protects the
//! third-party source from us, the limiter protects us from our callers.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

pub const RATE_WINDOW: Duration = Duration::from_millis(60_000);

/// Per-source weight budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_weight_per_minute: u32,
    pub request_weight: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_weight_per_minute: 1_200,
            request_weight: 20,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RateWindowEntry {
    weight: u32,
    at: Instant,
}

/// Sliding-window limiter for one source.
#[derive(Debug)]
pub struct WeightedRateLimiter {
    name: String,
    config: RateLimitConfig,
    window: Duration,
    windows: DashMap<String, VecDeque<RateWindowEntry>>,
}

impl WeightedRateLimiter {
    pub fn new(name: impl Into<String>, config: RateLimitConfig) -> Self {
        Self {
            name: name.into(),
            config,
            window: RATE_WINDOW,
            windows: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn request_weight(&self) -> u32 {
        self.config.request_weight
    }

    pub fn max_weight_per_minute(&self) -> u32 {
        self.config.max_weight_per_minute
    }

    /// Returns `true` and records the request weight if `identity` still has
    /// budget in the current window. Returns `false` otherwise; the caller
    /// must not proceed.
    pub fn check_rate_limit(&self, identity: &str) -> bool {
        let now = Instant::now();
        let mut window = self.windows.entry(identity.to_owned()).or_default();
        let used = prune(&mut window, now, self.window);

        if used.saturating_add(self.config.request_weight) > self.config.max_weight_per_minute {
            debug!(
                source = %self.name,
                identity,
                used,
                max = self.config.max_weight_per_minute,
                "rate limit exceeded"
            );
            return false;
        }

        window.push_back(RateWindowEntry {
            weight: self.config.request_weight,
            at: now,
        });
        true
    }

    /// Unused weight left for `identity` in the current window.
    pub fn remaining(&self, identity: &str) -> u32 {
        let now = Instant::now();
        let used = match self.windows.get_mut(identity) {
            Some(mut window) => prune(&mut window, now, self.window),
            None => 0,
        };
        self.config.max_weight_per_minute.saturating_sub(used)
    }

    /// Drops identities whose window holds no live entries. Returns how many
    /// were removed.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            prune(window, now, self.window);
            !window.is_empty()
        });
        before - self.windows.len()
    }

    pub fn tracked_identities(&self) -> usize {
        self.windows.len()
    }
}

/// Removes expired entries and returns the weight still inside the window.
fn prune(window: &mut VecDeque<RateWindowEntry>, now: Instant, span: Duration) -> u32 {
    while window
        .front()
        .is_some_and(|entry| now.duration_since(entry.at) >= span)
    {
        window.pop_front();
    }
    window.iter().map(|entry| entry.weight).sum()
}

/// One limiter per source name, created lazily from the configured limits.
#[derive(Debug, Default)]
pub struct RateLimiterRegistry {
    defaults: RateLimitConfig,
    overrides: BTreeMap<String, RateLimitConfig>,
    limiters: DashMap<String, Arc<WeightedRateLimiter>>,
}

impl RateLimiterRegistry {
    pub fn new(defaults: RateLimitConfig, overrides: BTreeMap<String, RateLimitConfig>) -> Self {
        Self {
            defaults,
            overrides,
            limiters: DashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Arc<WeightedRateLimiter> {
        if let Some(existing) = self.limiters.get(name) {
            return Arc::clone(existing.value());
        }
        let config = self.overrides.get(name).copied().unwrap_or(self.defaults);
        let limiter = self
            .limiters
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(WeightedRateLimiter::new(name, config)));
        Arc::clone(limiter.value())
    }

    /// Number of limiters created so far.
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    /// Runs [`WeightedRateLimiter::evict_idle`] on every limiter.
    pub fn evict_idle(&self) -> usize {
        self.limiters
            .iter()
            .map(|limiter| limiter.value().evict_idle())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32, weight: u32) -> WeightedRateLimiter {
        WeightedRateLimiter::new(
            "perp_markets",
            RateLimitConfig {
                max_weight_per_minute: max,
                request_weight: weight,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn identities_have_independent_windows() {
        let limiter = limiter(40, 20);

        assert!(limiter.check_rate_limit("10.0.0.1"));
        assert!(limiter.check_rate_limit("10.0.0.1"));
        assert!(!limiter.check_rate_limit("10.0.0.1"));
        assert!(limiter.check_rate_limit("10.0.0.2"));
        assert_eq!(limiter.remaining("10.0.0.2"), 20);
        assert_eq!(limiter.remaining("unknown"), 40);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_checks_do_not_consume_weight() {
        let limiter = limiter(20, 20);

        assert!(limiter.check_rate_limit("client"));
        for _ in 0..5 {
            assert!(!limiter.check_rate_limit("client"));
        }

        tokio::time::advance(RATE_WINDOW).await;
        assert!(limiter.check_rate_limit("client"));
    }

    #[tokio::test(start_paused = true)]
    async fn evict_idle_drops_expired_identities() {
        let limiter = limiter(100, 10);
        limiter.check_rate_limit("a");
        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.check_rate_limit("b");
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(limiter.evict_idle(), 1);
        assert_eq!(limiter.tracked_identities(), 1);
        assert_eq!(limiter.remaining("b"), 90);
    }

    #[test]
    fn registry_applies_per_source_overrides() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            String::from("leaderboard"),
            RateLimitConfig {
                max_weight_per_minute: 60,
                request_weight: 30,
            },
        );
        let registry = RateLimiterRegistry::new(RateLimitConfig::default(), overrides);

        assert_eq!(registry.get("leaderboard").request_weight(), 30);
        assert_eq!(registry.get("vaults").request_weight(), 20);
        assert!(Arc::ptr_eq(&registry.get("vaults"), &registry.get("vaults")));
    }
}

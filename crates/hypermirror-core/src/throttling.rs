//! Outbound request budget shared by every source that calls the same upstream.

use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Weighted per-minute budget for calls leaving the process.
///
/// Cloning shares the budget.
#[derive(Clone)]
pub struct OutboundBudget {
    limiter: Arc<DirectRateLimiter>,
    capacity: NonZeroU32,
}

impl OutboundBudget {
    pub fn new(quota_window: Duration, quota_limit: u32) -> Self {
        let capacity = NonZeroU32::new(quota_limit.max(1)).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Arc::new(RateLimiter::direct(quota_from_window(
                quota_window,
                capacity,
            ))),
            capacity,
        }
    }

    pub fn per_minute(max_weight: u32) -> Self {
        Self::new(Duration::from_secs(60), max_weight)
    }

    /// Charges `weight` without waiting. Returns `false` if the budget is spent.
    pub fn try_acquire(&self, weight: u32) -> bool {
        self.limiter.check_n(self.clamp(weight)).is_ok_and(|r| r.is_ok())
    }

    /// Waits until `weight` units are available, then charges them.
    pub async fn acquire(&self, weight: u32) {
        // Weight is clamped to the burst size so the wait can always complete.
        let _ = self.limiter.until_n_ready(self.clamp(weight)).await;
    }

    pub fn capacity(&self) -> u32 {
        self.capacity.get()
    }

    fn clamp(&self, weight: u32) -> NonZeroU32 {
        NonZeroU32::new(weight.clamp(1, self.capacity.get())).unwrap_or(NonZeroU32::MIN)
    }
}

impl fmt::Debug for OutboundBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundBudget")
            .field("capacity", &self.capacity)
            .finish()
    }
}

fn quota_from_window(quota_window: Duration, capacity: NonZeroU32) -> Quota {
    let seconds_per_cell = (quota_window.as_secs_f64() / f64::from(capacity.get())).max(0.001);
    let period = Duration::from_secs_f64(seconds_per_cell);

    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(capacity))
        .allow_burst(capacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spends_weight_until_budget_is_exhausted() {
        let budget = OutboundBudget::per_minute(100);

        assert!(budget.try_acquire(40));
        assert!(budget.try_acquire(40));
        assert!(budget.try_acquire(20));
        assert!(!budget.try_acquire(20), "fourth call exceeds the minute budget");
    }

    #[test]
    fn oversized_weight_is_clamped_to_capacity() {
        let budget = OutboundBudget::per_minute(10);

        assert_eq!(budget.capacity(), 10);
        assert!(budget.try_acquire(500));
        assert!(!budget.try_acquire(1));
    }

    #[test]
    fn clones_share_the_same_budget() {
        let budget = OutboundBudget::per_minute(2);
        let shared = budget.clone();

        assert!(budget.try_acquire(1));
        assert!(shared.try_acquire(1));
        assert!(!budget.try_acquire(1));
    }
}

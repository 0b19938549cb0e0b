//! Per-channel health tracking.
//!
//! Generalizes the request-counter/latency idiom from [`crate::providers::ProviderMetrics`]
//! from a provider-name key to an integer channel id, and adds the strategy-weighted
//! scoring functions the channel selector and virtual-model resolver both need.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::routing::SelectionStrategy;

/// Default average latency (ms) assumed for a channel with zero observations.
const DEFAULT_AVG_LATENCY_MS: f64 = 100.0;

/// Raw per-channel counters. All fields are independently atomic; a reader
/// computing a derived view may observe a torn snapshot across fields, which
/// is acceptable since the derived numbers are advisory scoring inputs, not
/// billing-grade accounting.
#[derive(Debug, Default)]
struct ChannelCounters {
    total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    consecutive_failures: AtomicU64,
    total_latency_ms: AtomicU64,
    last_success_unix: AtomicU64,
    last_error_unix: AtomicU64,
}

/// A point-in-time read of a channel's health counters plus derived scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthView {
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
}

impl HealthView {
    fn fail_penalty(&self) -> f64 {
        1.0 / (1.0 + self.consecutive_failures as f64)
    }

    /// `Score(weight) = successRate * weight * failPenalty * 1000 / avgLatencyMs`.
    pub fn score(&self, weight: f64) -> f64 {
        self.success_rate * weight * self.fail_penalty() * 1000.0 / self.avg_latency_ms
    }

    /// Strategy-weighted score blending quality (success rate), speed and cost.
    pub fn score_with_strategy(
        &self,
        weight: f64,
        strategy: &SelectionStrategy,
        cost_ratio: f64,
    ) -> f64 {
        let health_score = self.success_rate;
        let speed_score = (100.0 / self.avg_latency_ms).min(1.0);
        let cost_score = 1.0 / (1.0 + cost_ratio);
        (health_score * strategy.quality + speed_score * strategy.speed + cost_score * strategy.cost)
            * weight
            * self.fail_penalty()
            * 1000.0
    }
}

/// Tracks health counters for every channel seen so far. Lookups for an
/// unobserved channel return a neutral "assume healthy" default rather than
/// an error: the tracker never fails.
#[derive(Debug, Default)]
pub struct HealthTracker {
    channels: DashMap<i64, ChannelCounters>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one request against `channel_id`.
    pub fn observe(&self, channel_id: i64, latency_ms: u64, success: bool) {
        let counters = self.channels.entry(channel_id).or_default();
        counters.total.fetch_add(1, Ordering::Relaxed);
        counters
            .total_latency_ms
            .fetch_add(latency_ms, Ordering::Relaxed);

        let now = now_unix();
        if success {
            counters.successes.fetch_add(1, Ordering::Relaxed);
            counters.consecutive_failures.store(0, Ordering::Relaxed);
            counters.last_success_unix.store(now, Ordering::Relaxed);
        } else {
            counters.failures.fetch_add(1, Ordering::Relaxed);
            counters.consecutive_failures.fetch_add(1, Ordering::Relaxed);
            counters.last_error_unix.store(now, Ordering::Relaxed);
        }
    }

    /// Snapshot the current counters for `channel_id`, deriving `SuccessRate`
    /// and `AvgLatency`. Returns the "assume healthy until proven otherwise"
    /// default when the channel has never been observed.
    pub fn snapshot(&self, channel_id: i64) -> HealthView {
        let Some(counters) = self.channels.get(&channel_id) else {
            return HealthView {
                total: 0,
                successes: 0,
                failures: 0,
                consecutive_failures: 0,
                success_rate: 1.0,
                avg_latency_ms: DEFAULT_AVG_LATENCY_MS,
            };
        };

        let total = counters.total.load(Ordering::Relaxed);
        let successes = counters.successes.load(Ordering::Relaxed);
        let failures = counters.failures.load(Ordering::Relaxed);
        let consecutive_failures = counters.consecutive_failures.load(Ordering::Relaxed);
        let total_latency = counters.total_latency_ms.load(Ordering::Relaxed);

        HealthView {
            total,
            successes,
            failures,
            consecutive_failures,
            success_rate: successes as f64 / (total.max(1)) as f64,
            avg_latency_ms: if total == 0 {
                DEFAULT_AVG_LATENCY_MS
            } else {
                total_latency as f64 / total as f64
            },
        }
    }

    pub fn reset(&self, channel_id: i64) {
        self.channels.remove(&channel_id);
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unobserved_channel_is_assumed_healthy() {
        let tracker = HealthTracker::new();
        let view = tracker.snapshot(42);
        assert_eq!(view.success_rate, 1.0);
        assert_eq!(view.avg_latency_ms, DEFAULT_AVG_LATENCY_MS);
        assert_eq!(view.total, 0);
    }

    #[test]
    fn successes_and_failures_sum_to_total() {
        let tracker = HealthTracker::new();
        tracker.observe(1, 50, true);
        tracker.observe(1, 150, false);
        tracker.observe(1, 100, true);

        let view = tracker.snapshot(1);
        assert_eq!(view.total, 3);
        assert_eq!(view.successes + view.failures, view.total);
        assert_eq!(view.consecutive_failures, 0);
        assert_eq!(view.avg_latency_ms, 100.0);
    }

    #[test]
    fn consecutive_failures_reset_on_success() {
        let tracker = HealthTracker::new();
        tracker.observe(1, 10, false);
        tracker.observe(1, 10, false);
        assert_eq!(tracker.snapshot(1).consecutive_failures, 2);

        tracker.observe(1, 10, true);
        assert_eq!(tracker.snapshot(1).consecutive_failures, 0);
    }

    #[test]
    fn fail_penalty_suppresses_score_after_failures() {
        let tracker = HealthTracker::new();
        tracker.observe(1, 100, true);
        let healthy = tracker.snapshot(1).score(1.0);

        tracker.observe(1, 100, false);
        tracker.observe(1, 100, false);
        let degraded = tracker.snapshot(1).score(1.0);

        assert!(degraded < healthy);
    }
}

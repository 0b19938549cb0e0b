//! User quota accounting: pre-consume an upper-bound estimate before
//! dispatch, reconcile (and refund on failure) once the real token usage is
//! known.
//!
//! New module; grounded on the same per-key `DashMap` counter idiom as
//! [`crate::health::HealthTracker`], generalized from per-channel counters
//! to a per-user balance with a reservation step in between.

use dashmap::DashMap;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QuotaError {
    #[error("quota exhausted for user {user_id}: balance={balance}, requested={requested}")]
    Exhausted {
        user_id: String,
        balance: i64,
        requested: i64,
    },
}

/// Converts token usage into abstract quota units: `tokens * model_ratio *
/// group_ratio`. Ratios default to 1.0 when unconfigured.
pub fn quota_cost(tokens: u64, model_ratio: f64, group_ratio: f64) -> i64 {
    ((tokens as f64) * model_ratio * group_ratio).ceil() as i64
}

/// A single user's pre-paid balance, measured in abstract quota units.
#[derive(Debug, Default)]
struct Balance {
    remaining: i64,
}

/// Tracks per-user quota balances and in-flight reservations. Backed by a
/// `DashMap` so pre-consume/refund on different users never contend.
#[derive(Default)]
pub struct QuotaLedger {
    balances: DashMap<String, Balance>,
}

impl QuotaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed (or overwrite) a user's balance. Called when loading from the
    /// external relational store.
    pub fn set_balance(&self, user_id: &str, amount: i64) {
        self.balances
            .entry(user_id.to_string())
            .or_default()
            .remaining = amount;
    }

    pub fn balance(&self, user_id: &str) -> i64 {
        self.balances
            .get(user_id)
            .map(|b| b.remaining)
            .unwrap_or(0)
    }

    /// Reserve `amount` units against `user_id`'s balance ahead of
    /// dispatch. On success the balance is decremented immediately; the
    /// caller must call [`QuotaLedger::refund`] if the request subsequently
    /// fails, per the hard invariant that pre-consumed quota is always
    /// reconciled.
    pub fn pre_consume(&self, user_id: &str, amount: i64) -> Result<(), QuotaError> {
        let mut entry = self.balances.entry(user_id.to_string()).or_default();
        if entry.remaining < amount {
            return Err(QuotaError::Exhausted {
                user_id: user_id.to_string(),
                balance: entry.remaining,
                requested: amount,
            });
        }
        entry.remaining -= amount;
        Ok(())
    }

    /// Reconcile a reservation against the actual cost once usage is known:
    /// refunds the difference when actual cost is lower than the
    /// pre-consumed estimate, or consumes additional units when it's
    /// higher (the latter is allowed to drive the balance negative, since
    /// the reservation was only an upper-bound estimate).
    pub fn reconcile(&self, user_id: &str, pre_consumed: i64, actual: i64) {
        let delta = pre_consumed - actual;
        if delta == 0 {
            return;
        }
        let mut entry = self.balances.entry(user_id.to_string()).or_default();
        entry.remaining += delta;
    }

    /// Fully refund a reservation, e.g. after an upstream failure.
    pub fn refund(&self, user_id: &str, amount: i64) {
        if amount == 0 {
            return;
        }
        let mut entry = self.balances.entry(user_id.to_string()).or_default();
        entry.remaining += amount;
    }
}

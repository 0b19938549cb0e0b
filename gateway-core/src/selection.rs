//! Health-aware, strategy-weighted channel selection.
//!
//! Grounded on [`crate::routing::Router::filter_healthy_providers`]'s
//! filter-then-pick shape, generalized from a flat provider-id list to the
//! priority-tiered, Power-of-Two-Choices procedure the gateway's channel
//! selector requires.

use rand::Rng;

use crate::channel::{Channel, ChannelRegistry};
use crate::circuit_breaker::CircuitBreakerManager;
use crate::health::HealthTracker;
use crate::routing::SelectionStrategy;

#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error("no channel available for group={group} model={model}")]
    NoAvailableChannel { group: String, model: String },
}

/// Logged alongside the dispatched request.
#[derive(Debug, Clone, Copy)]
pub struct SelectionInfo {
    pub channel_id: i64,
    pub available_count: usize,
    pub score: f64,
}

pub struct ChannelSelector<'a> {
    registry: &'a ChannelRegistry,
    health: &'a HealthTracker,
    breakers: &'a CircuitBreakerManager,
}

impl<'a> ChannelSelector<'a> {
    pub fn new(
        registry: &'a ChannelRegistry,
        health: &'a HealthTracker,
        breakers: &'a CircuitBreakerManager,
    ) -> Self {
        Self {
            registry,
            health,
            breakers,
        }
    }

    /// Select a channel to serve `(group, model)`.
    ///
    /// `strategy` is `None` for the plain (non-strategy) score; `Some` uses
    /// `ScoreWithStrategy`. `ignore_first_priority` selects the complement of
    /// the top priority tier instead of the tier itself, used by retry logic
    /// to avoid hammering the same channel twice.
    pub fn select(
        &self,
        group: &str,
        model: &str,
        strategy: Option<&SelectionStrategy>,
        ignore_first_priority: bool,
    ) -> Result<(Channel, SelectionInfo), SelectionError> {
        let candidates = self.registry.candidates(group, model);
        if candidates.is_empty() {
            return Err(SelectionError::NoAvailableChannel {
                group: group.to_string(),
                model: model.to_string(),
            });
        }

        let dispatchable: Vec<Channel> = candidates
            .iter()
            .filter(|c| c.is_dispatchable() && !self.breakers.is_open(c.id))
            .cloned()
            .collect();
        if dispatchable.is_empty() {
            return Err(SelectionError::NoAvailableChannel {
                group: group.to_string(),
                model: model.to_string(),
            });
        }

        let top_priority = dispatchable[0].priority;
        let (tier, complement): (Vec<Channel>, Vec<Channel>) = dispatchable
            .into_iter()
            .partition(|c| c.priority == top_priority);
        let pool = if ignore_first_priority {
            complement
        } else {
            tier
        };

        if pool.is_empty() {
            return Err(SelectionError::NoAvailableChannel {
                group: group.to_string(),
                model: model.to_string(),
            });
        }

        let available_count = pool.len();
        let scored: Vec<(Channel, f64)> = pool
            .into_iter()
            .map(|c| {
                let score = self.score_channel(&c, strategy);
                (c, score)
            })
            .collect();

        let (channel, score) = match scored.len() {
            1 => scored.into_iter().next().expect("length checked above"),
            2 => {
                let mut it = scored.into_iter();
                let a = it.next().expect("length checked above");
                let b = it.next().expect("length checked above");
                if b.1 > a.1 {
                    b
                } else {
                    a
                }
            }
            _ => self.power_of_two_choices(scored),
        };

        let channel_id = channel.id;
        Ok((
            channel,
            SelectionInfo {
                channel_id,
                available_count,
                score,
            },
        ))
    }

    fn power_of_two_choices(&self, scored: Vec<(Channel, f64)>) -> (Channel, f64) {
        let mut rng = rand::thread_rng();
        let len = scored.len();
        let i = rng.gen_range(0..len);
        let mut j = rng.gen_range(0..len);
        while j == i {
            j = rng.gen_range(0..len);
        }

        let a = &scored[i];
        let b = &scored[j];
        if b.1 > a.1 {
            scored[j].clone()
        } else {
            scored[i].clone()
        }
    }

    fn score_channel(&self, channel: &Channel, strategy: Option<&SelectionStrategy>) -> f64 {
        let view = self.health.snapshot(channel.id);
        if view.total == 0 {
            // No health data: baseline score, bumped when the strategy
            // heavily favors cost (cost-biased strategies should still
            // prefer untested channels over starving them entirely).
            let mut baseline = channel.weight * 1000.0;
            if let Some(s) = strategy {
                if s.cost > 0.5 {
                    baseline *= 1.0 + s.cost;
                }
            }
            return baseline;
        }

        match strategy {
            Some(s) => view.score_with_strategy(channel.weight, s, default_cost_ratio()),
            None => view.score(channel.weight),
        }
    }
}

fn default_cost_ratio() -> f64 {
    0.5
}

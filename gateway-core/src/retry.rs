//! Jittered exponential backoff and retryable-error classification for the
//! distributor's retry loop. Grounded on the per-provider `max_retries`/
//! `retry_delay` fields already present on [`crate::providers::ProviderConfig`],
//! generalized into a standalone policy the distributor drives explicitly
//! rather than a provider adapter retrying internally.

use std::time::Duration;

use rand::Rng;

/// Backoff parameters: `InitialInterval · Multiplier^attempt`, capped at
/// `MaxInterval`, with multiplicative `±JitterFactor` jitter.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    pub jitter_factor: f64,
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.3,
            max_retries: 3,
        }
    }
}

impl BackoffPolicy {
    /// The delay before attempt `attempt` (0-indexed: the delay before the
    /// first retry is `delay_for(0)`), with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_interval.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped_ms = base_ms.min(self.max_interval.as_millis() as f64);

        let mut rng = rand::thread_rng();
        let jitter_range = capped_ms * self.jitter_factor;
        let jitter = rng.gen_range(-jitter_range..=jitter_range);
        let jittered_ms = (capped_ms + jitter).max(0.0);

        Duration::from_millis(jittered_ms as u64)
    }
}

/// Classification of an upstream or internal failure, used to decide
/// whether the distributor should retry against a different channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    Unauthorized,
    Forbidden,
    NoAvailableChannel,
    RateLimited,
    UpstreamTimeout,
    UpstreamError,
    QuotaExhausted,
    CircuitOpen,
    InternalError,
}

impl ErrorKind {
    /// `UpstreamTimeout`, `UpstreamError` and `CircuitOpen` are retried
    /// against a different channel; everything else is returned immediately.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::UpstreamTimeout | ErrorKind::UpstreamError | ErrorKind::CircuitOpen
        )
    }

    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::InvalidRequest => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NoAvailableChannel => 503,
            ErrorKind::RateLimited => 429,
            ErrorKind::UpstreamTimeout => 504,
            ErrorKind::UpstreamError => 502,
            ErrorKind::QuotaExhausted => 402,
            ErrorKind::CircuitOpen => 503,
            ErrorKind::InternalError => 500,
        }
    }
}

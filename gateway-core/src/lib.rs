//! # gateway-core
//!
//! Channel selection, health tracking, circuit breaking, virtual-model
//! resolution, rate limiting, response caching, quota accounting, and
//! per-provider adapters for an LLM request gateway.
//!
//! ## Overview
//!
//! This crate implements the request-dispatch dataplane: given an
//! authenticated `(group, model)` request it picks a healthy upstream
//! channel, resolves virtual model names like `auto-cheap`, rewrites the
//! request for the chosen provider, and tracks the outcome.
//!
//! - [`channel`]: the in-memory `(group, model) -> channels` snapshot
//! - [`health`]: per-channel success/latency/failure counters and scoring
//! - [`circuit_breaker`]: per-channel closed/open/half-open state machine
//! - [`selection`]: health-aware, strategy-weighted, Power-of-Two-Choices picker
//! - [`virtual_model`]: feature analysis and `auto*` resolution
//! - [`rate_limit`]: sharded local and Lua-scripted remote limiters
//! - [`response_cache`]: exact-fingerprint and semantic prompt caches
//! - [`quota`]: pre-consume/refund accounting for per-user quota
//! - [`log_batcher`]: buffered, periodic writes to the log store
//! - [`providers`]: per-provider request adapters
//! - [`client`], [`routing`], [`cache`]: the standalone (non-gateway) SDK
//!   client mode, retained for direct multi-provider use outside the gateway
//!
//! ## License
//!
//! This project is licensed under the MIT License - see the [LICENSE](LICENSE) file for details.
pub mod cache;
pub mod channel;
pub mod circuit_breaker;
pub mod client;
pub mod common;
pub mod error;
pub mod health;
pub mod log_batcher;
pub mod models;
pub mod providers;
pub mod quota;
pub mod rate_limit;
pub mod response_cache;
pub mod retry;
pub mod routing;
pub mod selection;
pub mod virtual_model;

pub use channel::{Channel, ChannelRegistry, ChannelStatus};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerManager, CircuitState,
};
pub use client::{ClientMode, UltrafastClient, UltrafastClientBuilder};
pub use error::{ClientError, ProviderError};
pub use health::{HealthTracker, HealthView};
pub use models::{
    AudioRequest, AudioResponse, ChatRequest, ChatResponse, Choice, Content, EmbeddingRequest,
    EmbeddingResponse, ImageRequest, ImageResponse, Message, Part, Role, SpeechRequest,
    SpeechResponse, Usage,
};
pub use providers::{
    create_provider_with_circuit_breaker, provider_name, Provider, ProviderConfig, ProviderMetrics,
};
pub use quota::{QuotaError, QuotaLedger};
pub use response_cache::{CacheEntry, ExactCache, SemanticCache, StreamCapture};
pub use routing::{Condition, RoutingRule, RoutingStrategy, SelectionStrategy};
pub use selection::{ChannelSelector, SelectionError, SelectionInfo};
pub use virtual_model::{analyze_request, resolve_virtual_model, RequestFeatures};

/// Result type for SDK operations.
///
/// This is a convenience type alias for SDK operations that can fail.
/// It uses `ClientError` as the error type.
pub type Result<T> = std::result::Result<T, ClientError>;

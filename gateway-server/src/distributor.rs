//! Request-dispatch distributor: the one place a chat-completion request
//! goes from "authenticated request in group G for model M" to "response
//! from a concrete channel", with caching, quota, health, circuit breaking
//! and log batching wired around it.
//!
//! New module; there is no single teacher counterpart (the teacher's
//! [`gateway_core::client::UltrafastClient`] and [`gateway_core::routing::Router`]
//! pick a *provider*, not a *channel*, and carry no quota/cache/log
//! bookkeeping). The shape mirrors the teacher's
//! [`gateway_core::providers::create_provider_with_circuit_breaker`] factory
//! ("build once at startup, hand callers an owned, ready-to-call object")
//! generalized to own the full gateway-core dataplane rather than a single
//! wrapped provider.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use gateway_core::channel::{Channel, ChannelRegistry};
use gateway_core::circuit_breaker::{ChannelBreakerConfig, CircuitBreakerManager};
use gateway_core::health::HealthTracker;
use gateway_core::log_batcher::{AsyncLogBatcher, LogEntry, LogSink};
use gateway_core::models::{ChatResponse, Choice, ChatRequest, Message, Role, Usage};
use gateway_core::providers::{create_provider_with_circuit_breaker, provider_name, ProviderConfig};
use gateway_core::quota::QuotaLedger;
use gateway_core::rate_limit::{Decision, LocalRateLimiter};
use gateway_core::response_cache::{fingerprint_request, CacheEntry, ExactCache, SemanticCache};
use gateway_core::retry::{BackoffPolicy, ErrorKind};
use gateway_core::routing::SelectionStrategy;
use gateway_core::selection::{ChannelSelector, SelectionError};
use gateway_core::virtual_model::{analyze_request, is_virtual_model, resolve_virtual_model, ScoringTables};

use crate::config::Config;
use crate::gateway_error::GatewayError;

/// Default quota reservation multiplier applied to the estimated prompt
/// token count, to cover the (unknown ahead of time) completion tokens.
const QUOTA_ESTIMATE_MULTIPLIER: u64 = 2;

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Everything a handler needs to set the `X-RateLimit-*`/`X-Auto-*`/
/// `X-Cache-Hit` response headers and write an audit log row.
#[derive(Debug, Clone)]
pub struct DispatchMeta {
    pub requested_model: String,
    pub selected_model: String,
    pub selection_score: f64,
    pub selection_reason: String,
    pub channel_id: i64,
    pub cache_hit: bool,
    /// Whether `requested_model` was a virtual model name (`auto*`) resolved
    /// by the scoring strategy, as opposed to a literal model dispatched by
    /// health-based channel selection alone. Gates the `X-Auto-*` response
    /// headers, which only make sense for a virtual-model resolution.
    pub is_virtual: bool,
}

/// A sink that records audit rows via `tracing`. Used until an external
/// relational store is wired in; kept separate from [`AsyncLogBatcher`] so
/// swapping the backing store never touches the batching logic.
struct TracingLogSink;

#[async_trait::async_trait]
impl LogSink for TracingLogSink {
    async fn write_batch(&self, entries: &[LogEntry]) -> Result<(), anyhow::Error> {
        for entry in entries {
            tracing::info!(
                request_id = %entry.request_id,
                user_id = %entry.user_id,
                group = %entry.group,
                requested_model = %entry.requested_model,
                actual_model = %entry.actual_model,
                channel_id = entry.channel_id,
                selection_reason = %entry.selection_reason,
                prompt_tokens = entry.prompt_tokens,
                completion_tokens = entry.completion_tokens,
                quota_used = entry.quota_used,
                status_code = entry.status_code,
                latency_ms = entry.latency_ms,
                "dispatch"
            );
        }
        Ok(())
    }
}

/// A sink that appends each row as a JSON line to `<dir>/gateway-audit.log`,
/// used when `--log-dir`/`GATEWAY_LOG_DIR` is configured. Opens the file
/// once at construction and appends under a tokio mutex for the lifetime of
/// the process, mirroring the teacher's `LogOutput::File` tracing sink.
struct JsonlFileSink {
    file: AsyncMutex<tokio::fs::File>,
}

impl JsonlFileSink {
    async fn open(dir: &str) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let path = std::path::Path::new(dir).join("gateway-audit.log");
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            file: AsyncMutex::new(file),
        })
    }
}

#[async_trait::async_trait]
impl LogSink for JsonlFileSink {
    async fn write_batch(&self, entries: &[LogEntry]) -> Result<(), anyhow::Error> {
        use tokio::io::AsyncWriteExt;
        let mut buf = String::new();
        for entry in entries {
            buf.push_str(&serde_json::to_string(entry)?);
            buf.push('\n');
        }
        let mut file = self.file.lock().await;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Join concatenated text across every message, used as the semantic
/// cache's similarity query. Deliberately simpler than
/// [`gateway_core::virtual_model::analyze_request`]'s user-turn extraction:
/// the cache wants the full exchange, not just the latest user turn.
fn prompt_text(request: &ChatRequest) -> String {
    request
        .messages
        .iter()
        .map(|m| m.content.as_text())
        .collect::<Vec<_>>()
        .join("\n")
}

fn synthesize_chat_response(model: &str, content: &str, tokens_used: u32) -> ChatResponse {
    ChatResponse {
        id: format!("chatcmpl-cache-{}", uuid::Uuid::new_v4()),
        object: "chat.completion".to_string(),
        created: now_unix(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: Message::assistant(content),
            finish_reason: Some("stop".to_string()),
            logprobs: None,
        }],
        usage: Some(Usage {
            prompt_tokens: 0,
            completion_tokens: tokens_used,
            total_tokens: tokens_used,
        }),
        system_fingerprint: None,
    }
}

fn provider_error_kind(err: &gateway_core::error::ProviderError) -> ErrorKind {
    use gateway_core::error::ProviderError;
    match err {
        ProviderError::InvalidApiKey | ProviderError::AuthenticationFailed { .. } => {
            ErrorKind::Unauthorized
        }
        ProviderError::ModelNotFound { .. }
        | ProviderError::Configuration { .. }
        | ProviderError::ProviderNotSupported { .. }
        | ProviderError::FeatureNotSupported { .. }
        | ProviderError::InvalidResponse
        | ProviderError::Serialization(_) => ErrorKind::UpstreamError,
        ProviderError::RateLimit => ErrorKind::RateLimited,
        ProviderError::QuotaExceeded => ErrorKind::QuotaExhausted,
        ProviderError::Timeout => ErrorKind::UpstreamTimeout,
        ProviderError::ServiceUnavailable | ProviderError::Http(_) => ErrorKind::UpstreamError,
        ProviderError::Api { code, .. } if *code == 429 => ErrorKind::RateLimited,
        ProviderError::Api { code, .. } if *code >= 500 => ErrorKind::UpstreamError,
        ProviderError::Api { .. } => ErrorKind::UpstreamError,
    }
}

fn error_kind_to_gateway_error(kind: ErrorKind, detail: &str) -> GatewayError {
    let message = if detail.is_empty() {
        match kind {
            ErrorKind::NoAvailableChannel => "no dispatchable channel for this model/group".to_string(),
            ErrorKind::CircuitOpen => "all candidate channels have open circuit breakers".to_string(),
            _ => kind_label(kind).to_string(),
        }
    } else {
        detail.to_string()
    };
    GatewayError::Dispatch { kind, message }
}

fn kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::InvalidRequest => "invalid request",
        ErrorKind::Unauthorized => "unauthorized",
        ErrorKind::Forbidden => "forbidden",
        ErrorKind::NoAvailableChannel => "no available channel",
        ErrorKind::RateLimited => "rate limited",
        ErrorKind::UpstreamTimeout => "upstream timeout",
        ErrorKind::UpstreamError => "upstream error",
        ErrorKind::QuotaExhausted => "quota exhausted",
        ErrorKind::CircuitOpen => "circuit open",
        ErrorKind::InternalError => "internal error",
    }
}

/// Channel selection, circuit breaking, virtual-model resolution, response
/// caching, quota accounting and log batching for chat-completion dispatch.
pub struct Distributor {
    registry: ChannelRegistry,
    health: HealthTracker,
    breakers: CircuitBreakerManager,
    quota: QuotaLedger,
    exact_cache: ExactCache,
    semantic_cache: SemanticCache,
    rate_limiter: LocalRateLimiter,
    tables: ScoringTables,
    backoff: BackoffPolicy,
    cache_ttl: Duration,
    log_batcher: Arc<AsyncLogBatcher>,
    log_handle: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Distributor {
    pub async fn from_config(config: &Config) -> Self {
        let registry = ChannelRegistry::new();
        registry.replace_all(config.channels.iter().map(|c| c.to_channel()).collect());

        let sink: Arc<dyn LogSink> = match &config.logging.request_log_dir {
            Some(dir) => match JsonlFileSink::open(dir).await {
                Ok(sink) => Arc::new(sink),
                Err(err) => {
                    tracing::warn!(error = %err, dir = %dir, "failed to open log-dir audit file, falling back to tracing sink");
                    Arc::new(TracingLogSink)
                }
            },
            None => Arc::new(TracingLogSink),
        };
        let log_batcher = Arc::new(AsyncLogBatcher::new(sink));
        let log_handle = log_batcher.spawn();

        Self {
            registry,
            health: HealthTracker::new(),
            breakers: CircuitBreakerManager::new(ChannelBreakerConfig::default()),
            quota: QuotaLedger::new(),
            exact_cache: ExactCache::new(),
            semantic_cache: SemanticCache::new(config.cache.max_size.max(1)),
            rate_limiter: LocalRateLimiter::new(),
            tables: ScoringTables::gateway_default(),
            backoff: BackoffPolicy::default(),
            cache_ttl: config.cache.ttl,
            log_batcher,
            log_handle: AsyncMutex::new(Some(log_handle)),
        }
    }

    /// Reload the channel set, e.g. after the admin plane edits channels.
    pub fn reload_channels(&self, channels: Vec<Channel>) {
        self.registry.replace_all(channels);
    }

    /// Sliding-window rate-limit check for a caller key (typically the
    /// authenticated user id or API key).
    pub fn check_rate_limit(&self, key: &str, limit: u32, window_seconds: u64) -> Decision {
        self.rate_limiter.check(key, limit, window_seconds)
    }

    /// Drain and stop the background log flusher. Call once during
    /// graceful shutdown.
    pub async fn shutdown(&self) {
        let mut guard = self.log_handle.lock().await;
        if let Some(handle) = guard.take() {
            self.log_batcher.stop(handle).await;
        }
    }

    fn lookup_cache(&self, request: &ChatRequest) -> Option<CacheEntry> {
        let fp = fingerprint_request(request);
        if let Some(entry) = self.exact_cache.lookup(&fp) {
            return Some(entry);
        }
        let query = prompt_text(request);
        if query.trim().is_empty() {
            return None;
        }
        self.semantic_cache
            .lookup(&request.model, &query)
            .map(|semantic| CacheEntry {
                content: semantic.response,
                model: semantic.model,
                created_at: semantic.created_at,
                tokens_used: semantic.tokens,
                sse_frames: Vec::new(),
            })
    }

    fn store_cache(&self, request: &ChatRequest, content: &str, tokens_used: u32, sse_frames: Vec<String>) {
        let fp = fingerprint_request(request);
        self.exact_cache.store(
            fp,
            CacheEntry {
                content: content.to_string(),
                model: request.model.clone(),
                created_at: now_unix(),
                tokens_used,
                sse_frames,
            },
            self.cache_ttl,
        );
        let query = prompt_text(request);
        if !query.trim().is_empty() {
            self.semantic_cache
                .store(&request.model, &query, content.to_string(), tokens_used);
        }
    }

    /// Resolve the requested (possibly virtual) model name to a concrete
    /// model plus the strategy used to weigh channel candidates sharing it.
    fn resolve_model(
        &self,
        requested_model: &str,
        group: &str,
        request: &ChatRequest,
    ) -> Result<(String, Option<SelectionStrategy>, Option<String>), GatewayError> {
        if !is_virtual_model(requested_model) {
            return Ok((requested_model.to_string(), None, None));
        }

        let features = analyze_request(request);
        let resolved = resolve_virtual_model(
            requested_model,
            group,
            &features,
            &self.registry,
            &self.health,
            &self.tables,
        )
        .ok_or(GatewayError::ServiceUnavailable)?;

        Ok((
            resolved.selected_model,
            Some(SelectionStrategy::by_name(requested_model)),
            Some(resolved.reason),
        ))
    }

    fn build_provider_config(channel: &Channel) -> ProviderConfig {
        ProviderConfig::new(provider_name(channel.provider_type), channel.api_key.clone())
            .with_base_url(channel.base_url.clone())
    }

    async fn dispatch_once(
        &self,
        channel: &Channel,
        selected_model: &str,
        request: &ChatRequest,
    ) -> Result<ChatResponse, ErrorKind> {
        let provider = create_provider_with_circuit_breaker(Self::build_provider_config(channel), None)
            .map_err(|e| provider_error_kind(&e))?;

        let mut provider_request = request.clone();
        provider_request.model = channel.actual_model_name(selected_model);

        provider
            .chat_completion(provider_request)
            .await
            .map_err(|e| provider_error_kind(&e))
    }

    /// Pick a dispatchable channel for `(group, model)`, honoring circuit
    /// breaker state. `ignore_first_priority` retries against the
    /// second-best priority tier when the top tier is exhausted.
    fn select_channel(
        &self,
        group: &str,
        model: &str,
        strategy: Option<&SelectionStrategy>,
        ignore_first_priority: bool,
    ) -> Result<Channel, ErrorKind> {
        let selector = ChannelSelector::new(&self.registry, &self.health, &self.breakers);
        match selector.select(group, model, strategy, ignore_first_priority) {
            Ok((channel, _info)) => Ok(channel),
            Err(SelectionError::NoAvailableChannel { .. }) => Err(ErrorKind::NoAvailableChannel),
        }
    }

    /// Full non-streaming dispatch: cache check, quota reservation,
    /// channel selection with retry/backoff, health and circuit-breaker
    /// bookkeeping, and an async log row.
    pub async fn dispatch(
        &self,
        group: &str,
        user_id: &str,
        request_id: &str,
        request: ChatRequest,
    ) -> Result<(ChatResponse, DispatchMeta), GatewayError> {
        let requested_model = request.model.clone();

        if let Some(cached) = self.lookup_cache(&request) {
            let response = synthesize_chat_response(&cached.model, &cached.content, cached.tokens_used);
            let meta = DispatchMeta {
                is_virtual: is_virtual_model(&requested_model),
                requested_model,
                selected_model: cached.model,
                selection_score: 1.0,
                selection_reason: "exact or semantic cache hit".to_string(),
                channel_id: -1,
                cache_hit: true,
            };
            self.log(request_id, user_id, group, &meta, 0, cached.tokens_used, 0, 200);
            return Ok((response, meta));
        }

        let (selected_model, strategy, vm_reason) =
            self.resolve_model(&requested_model, group, &request)?;

        let features = analyze_request(&request);
        let pre_consumed = gateway_core::quota::quota_cost(
            u64::from(features.estimated_tokens.max(1)) * QUOTA_ESTIMATE_MULTIPLIER,
            1.0,
            1.0,
        );
        self.quota
            .pre_consume(user_id, pre_consumed)
            .map_err(|e| GatewayError::RateLimit {
                message: e.to_string(),
            })?;

        let mut ignore_first_priority = false;
        let mut last_kind = ErrorKind::NoAvailableChannel;
        let mut last_detail = String::new();

        for attempt in 0..=self.backoff.max_retries {
            let channel = match self.select_channel(
                group,
                &selected_model,
                strategy.as_ref(),
                ignore_first_priority,
            ) {
                Ok(channel) => channel,
                Err(kind) => {
                    last_kind = kind;
                    break;
                }
            };

            if let Err(breaker_err) = self.breakers.allow(channel.id) {
                last_kind = ErrorKind::CircuitOpen;
                last_detail = breaker_err.to_string();
                ignore_first_priority = true;
                continue;
            }

            let start = Instant::now();
            let result = self.dispatch_once(&channel, &selected_model, &request).await;
            let latency_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(response) => {
                    self.health.observe(channel.id, latency_ms, true);
                    self.breakers.record_success(channel.id);

                    let completion_tokens =
                        response.usage.as_ref().map(|u| u.total_tokens).unwrap_or(0);
                    let actual_cost = gateway_core::quota::quota_cost(u64::from(completion_tokens), 1.0, 1.0);
                    self.quota.reconcile(user_id, pre_consumed, actual_cost);

                    if let Some(text) = response.choices.first().map(|c| c.message.content.as_text()) {
                        self.store_cache(&request, &text, completion_tokens, Vec::new());
                    }

                    let reason = vm_reason
                        .clone()
                        .unwrap_or_else(|| "Health-based channel selection".to_string());
                    let meta = DispatchMeta {
                        requested_model: requested_model.clone(),
                        selected_model: selected_model.clone(),
                        selection_score: self.health.snapshot(channel.id).score(channel.weight.max(1.0)),
                        selection_reason: reason,
                        channel_id: channel.id,
                        cache_hit: false,
                        is_virtual: vm_reason.is_some(),
                    };
                    self.log(
                        request_id,
                        user_id,
                        group,
                        &meta,
                        response.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
                        response.usage.as_ref().map(|u| u.completion_tokens).unwrap_or(0),
                        actual_cost,
                        200,
                    );
                    return Ok((response, meta));
                }
                Err(kind) => {
                    self.health.observe(channel.id, latency_ms, false);
                    self.breakers.record_failure(channel.id);
                    last_kind = kind;

                    if kind.is_retryable() && attempt < self.backoff.max_retries {
                        tokio::time::sleep(self.backoff.delay_for(attempt)).await;
                        ignore_first_priority = true;
                        continue;
                    }
                    break;
                }
            }
        }

        self.quota.refund(user_id, pre_consumed);
        let meta = DispatchMeta {
            requested_model: requested_model.clone(),
            selected_model: selected_model.clone(),
            selection_score: 0.0,
            selection_reason: "dispatch failed".to_string(),
            channel_id: -1,
            cache_hit: false,
            is_virtual: vm_reason.is_some(),
        };
        self.log(request_id, user_id, group, &meta, 0, 0, 0, last_kind.http_status());
        Err(error_kind_to_gateway_error(last_kind, &last_detail))
    }

    /// Resolve the channel and provider for a streaming request without
    /// consuming the stream. Cache replay for streaming requests is limited
    /// to the exact cache's stored SSE frames; on a hit, returns the frames
    /// directly instead of a live stream.
    pub async fn begin_stream(
        &self,
        group: &str,
        user_id: &str,
        request_id: &str,
        request: ChatRequest,
    ) -> Result<StreamDispatch, GatewayError> {
        let requested_model = request.model.clone();

        let fp = fingerprint_request(&request);
        if let Some(cached) = self.exact_cache.lookup(&fp) {
            if !cached.sse_frames.is_empty() {
                let meta = DispatchMeta {
                    is_virtual: is_virtual_model(&requested_model),
                    requested_model,
                    selected_model: cached.model,
                    selection_score: 1.0,
                    selection_reason: "exact cache hit".to_string(),
                    channel_id: -1,
                    cache_hit: true,
                };
                self.log(request_id, user_id, group, &meta, 0, cached.tokens_used, 0, 200);
                return Ok(StreamDispatch::Cached(cached.sse_frames, meta));
            }
        }

        let (selected_model, strategy, vm_reason) =
            self.resolve_model(&requested_model, group, &request)?;

        let features = analyze_request(&request);
        let pre_consumed = gateway_core::quota::quota_cost(
            u64::from(features.estimated_tokens.max(1)) * QUOTA_ESTIMATE_MULTIPLIER,
            1.0,
            1.0,
        );
        self.quota
            .pre_consume(user_id, pre_consumed)
            .map_err(|e| GatewayError::RateLimit {
                message: e.to_string(),
            })?;

        let mut ignore_first_priority = false;
        let mut last_kind = ErrorKind::NoAvailableChannel;

        for attempt in 0..=self.backoff.max_retries {
            let channel = match self.select_channel(
                group,
                &selected_model,
                strategy.as_ref(),
                ignore_first_priority,
            ) {
                Ok(channel) => channel,
                Err(kind) => {
                    last_kind = kind;
                    break;
                }
            };

            if self.breakers.allow(channel.id).is_err() {
                last_kind = ErrorKind::CircuitOpen;
                ignore_first_priority = true;
                continue;
            }

            let provider = match create_provider_with_circuit_breaker(Self::build_provider_config(&channel), None) {
                Ok(p) => p,
                Err(e) => {
                    self.breakers.record_failure(channel.id);
                    last_kind = provider_error_kind(&e);
                    continue;
                }
            };

            let mut provider_request = request.clone();
            provider_request.model = channel.actual_model_name(&selected_model);

            let start = Instant::now();
            match provider.stream_chat_completion(provider_request).await {
                Ok(stream) => {
                    let latency_ms = start.elapsed().as_millis() as u64;
                    self.health.observe(channel.id, latency_ms, true);
                    self.breakers.record_success(channel.id);

                    let reason = vm_reason
                        .clone()
                        .unwrap_or_else(|| "Health-based channel selection".to_string());
                    let meta = DispatchMeta {
                        requested_model: requested_model.clone(),
                        selected_model: selected_model.clone(),
                        selection_score: self.health.snapshot(channel.id).score(channel.weight.max(1.0)),
                        selection_reason: reason,
                        channel_id: channel.id,
                        cache_hit: false,
                        is_virtual: vm_reason.is_some(),
                    };
                    return Ok(StreamDispatch::Fresh {
                        stream,
                        meta,
                        pre_consumed_quota: pre_consumed,
                    });
                }
                Err(e) => {
                    let latency_ms = start.elapsed().as_millis() as u64;
                    self.health.observe(channel.id, latency_ms, false);
                    self.breakers.record_failure(channel.id);
                    last_kind = provider_error_kind(&e);
                    if last_kind.is_retryable() && attempt < self.backoff.max_retries {
                        tokio::time::sleep(self.backoff.delay_for(attempt)).await;
                        ignore_first_priority = true;
                        continue;
                    }
                    break;
                }
            }
        }

        self.quota.refund(user_id, pre_consumed);
        Err(error_kind_to_gateway_error(last_kind, "stream dispatch failed"))
    }

    /// Called by the handler once a freshly-dispatched stream completes:
    /// reconciles quota against the captured token count, stores the
    /// replayable SSE frames in the exact cache, and writes the audit row.
    pub fn finalize_stream(
        &self,
        request: &ChatRequest,
        request_id: &str,
        user_id: &str,
        group: &str,
        meta: &DispatchMeta,
        pre_consumed_quota: i64,
        captured_frames: Vec<String>,
        assistant_text: &str,
        token_count: u32,
        success: bool,
    ) {
        let actual_cost = if success {
            gateway_core::quota::quota_cost(u64::from(token_count), 1.0, 1.0)
        } else {
            0
        };
        self.quota.reconcile(user_id, pre_consumed_quota, actual_cost);

        if success && !assistant_text.is_empty() {
            self.store_cache(request, assistant_text, token_count, captured_frames);
        }

        self.log(
            request_id,
            user_id,
            group,
            meta,
            0,
            token_count,
            actual_cost,
            if success { 200 } else { 502 },
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn log(
        &self,
        request_id: &str,
        user_id: &str,
        group: &str,
        meta: &DispatchMeta,
        prompt_tokens: u32,
        completion_tokens: u32,
        quota_used: i64,
        status_code: u16,
    ) {
        self.log_batcher.add(LogEntry {
            request_id: request_id.to_string(),
            user_id: user_id.to_string(),
            group: group.to_string(),
            token_id: 0,
            requested_model: meta.requested_model.clone(),
            actual_model: meta.selected_model.clone(),
            channel_id: meta.channel_id,
            selection_reason: meta.selection_reason.clone(),
            prompt_tokens,
            completion_tokens,
            quota_used,
            status_code,
            latency_ms: 0,
            created_at: now_unix(),
        });
    }
}

/// Outcome of [`Distributor::begin_stream`]: either a cache replay (already
/// materialized SSE frames) or a live provider stream to forward and
/// capture.
pub enum StreamDispatch {
    Cached(Vec<String>, DispatchMeta),
    Fresh {
        stream: gateway_core::providers::StreamResult,
        meta: DispatchMeta,
        pre_consumed_quota: i64,
    },
}

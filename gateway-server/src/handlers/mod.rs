//! # HTTP Request Handlers Module
//!
//! This module contains all HTTP request handlers for the Ultrafast Gateway API.
//! It provides endpoints for chat completions, embeddings, image generation,
//! audio processing, and administrative functions.
//!
//! ## Overview
//!
//! The handlers module provides:
//! - **Core API Endpoints**: Chat completions, embeddings, image generation
//! - **Streaming Support**: Server-sent events for real-time responses
//! - **Caching Integration**: Automatic response caching and retrieval
//! - **Metrics Collection**: Performance tracking and cost calculation
//! - **Admin Endpoints**: Health checks, metrics, and configuration
//!
//! ## API Endpoints
//!
//! ### Core API Endpoints
//!
//! - `POST /v1/chat/completions` - Chat completion API with streaming support
//! - `POST /v1/embeddings` - Text embedding generation
//! - `POST /v1/images/generations` - Image generation from text prompts
//! - `POST /v1/audio/transcriptions` - Audio transcription
//! - `POST /v1/audio/speech` - Text-to-speech conversion
//! - `GET /v1/models` - List available models
//!
//! ### Admin Endpoints
//!
//! - `GET /health` - Service health check
//! - `GET /metrics` - Performance metrics in JSON format
//! - `GET /metrics/prometheus` - Prometheus-compatible metrics
//! - `GET /admin/providers` - Provider status and health
//! - `GET /admin/config` - Current configuration status
//! - `GET /admin/circuit-breaker` - Circuit breaker metrics
//!
//! ## Request Flow
//!
//! Each request follows this general flow:
//!
//! 1. **Authentication**: Validate API key or JWT token
//! 2. **Rate Limiting**: Check user and provider rate limits
//! 3. **Caching**: Check for cached responses
//! 4. **Provider Selection**: Route to appropriate provider
//! 5. **Request Processing**: Execute the request
//! 6. **Response Caching**: Cache successful responses
//! 7. **Metrics Collection**: Track performance and costs
//!
//! ## Streaming Support
//!
//! The gateway supports streaming responses for chat completions:
//!
//! - **Server-Sent Events**: Real-time token streaming
//! - **Chunked Responses**: Progressive response delivery
//! - **Error Handling**: Graceful error propagation
//! - **Backpressure**: Automatic flow control
//!
//! ## Caching Strategy
//!
//! Responses are cached based on:
//!
//! - **Request Hash**: Unique cache keys for each request
//! - **TTL Calculation**: Dynamic TTL based on response time
//! - **Cache Invalidation**: Automatic expiration and cleanup
//! - **Cache Miss Handling**: Fallback to provider requests
//!
//! ## Cost Tracking
//!
//! The gateway tracks costs for each provider:
//!
//! - **Token Counting**: Input and output token tracking
//! - **Provider Pricing**: Per-provider cost calculation
//! - **Cost Aggregation**: Total cost tracking
//! - **Cost Reporting**: Cost metrics in responses
//!
//! ## Error Handling
//!
//! All handlers include comprehensive error handling:
//!
//! - **Validation Errors**: Request validation and sanitization
//! - **Provider Errors**: Graceful provider error handling
//! - **Rate Limit Errors**: Proper rate limit responses
//! - **Cache Errors**: Fallback on cache failures
//! - **Network Errors**: Retry logic and timeouts
//!
//! ## Performance Optimization
//!
//! The handlers include several performance optimizations:
//!
//! - **JSON Optimization**: Request payload optimization
//! - **Response Streaming**: Efficient streaming responses
//! - **Connection Pooling**: Reusable HTTP connections
//! - **Memory Management**: Efficient memory usage
//! - **Concurrent Processing**: Async request handling

use crate::auth::AuthContext;
use crate::distributor::{DispatchMeta, StreamDispatch};
use crate::gateway_error::GatewayError;
use crate::server::AppState;
use axum::response::sse::{Event, Sse};
use axum::{
    body::Body,
    extract::{Extension, State},
    http::{HeaderValue, Response, StatusCode},
    response::Json,
};
use futures::StreamExt;
use gateway_core::response_cache::StreamCapture;
use serde_json::{json, Value};
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;
use gateway_core::error::ProviderError;
use gateway_core::models::{
    AudioRequest, AudioResponse, ChatRequest, EmbeddingRequest, EmbeddingResponse, ImageRequest,
    ImageResponse, SpeechRequest, SpeechResponse,
};

/// Group and user id to dispatch under, derived from the authenticated
/// request (if auth is enabled) or a neutral default otherwise.
fn dispatch_identity(auth: Option<&AuthContext>) -> (String, String) {
    match auth {
        Some(ctx) => {
            let group = ctx
                .metadata
                .get("group")
                .cloned()
                .unwrap_or_else(|| "default".to_string());
            (group, ctx.user_id.clone())
        }
        None => ("default".to_string(), "anonymous".to_string()),
    }
}

fn set_header(response: &mut Response<Body>, name: &'static str, value: impl std::fmt::Display) {
    if let Ok(v) = HeaderValue::from_str(&value.to_string()) {
        response.headers_mut().insert(name, v);
    }
}

fn apply_dispatch_headers(response: &mut Response<Body>, meta: &DispatchMeta) {
    if meta.is_virtual {
        set_header(response, "x-auto-requested-model", &meta.requested_model);
        set_header(response, "x-auto-selected-model", &meta.selected_model);
        set_header(response, "x-auto-selection-score", meta.selection_score);
        set_header(response, "x-auto-selection-reason", &meta.selection_reason);
    }
    set_header(response, "x-cache-hit", meta.cache_hit);
}

/// Ingress rate-limit window, seconds. The limit itself is configurable
/// (`auth.rate_limiting.requests_per_minute`); the window is fixed at a
/// minute to match that name.
const INGRESS_RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Handle chat completion requests with caching and streaming support.
///
/// This endpoint processes chat completion requests, supports both streaming
/// and non-streaming responses, and includes automatic caching and cost tracking.
///
/// # Arguments
///
/// * `state` - Application state containing client and cache manager
/// * `request` - Chat completion request with messages and parameters
///
/// # Returns
///
/// Returns a JSON response with the completion or a streaming response.
///
/// # Errors
///
/// Returns a GatewayError if:
/// - Request validation fails
/// - Provider selection fails
/// - Cache operations fail
/// - Provider request fails
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:3000/v1/chat/completions \
///   -H "Content-Type: application/json" \
///   -H "Authorization: Bearer sk-..." \
///   -d '{
///     "model": "gpt-4",
///     "messages": [{"role": "user", "content": "Hello!"}],
///     "stream": false
///   }'
/// ```
pub async fn chat_completions(
    State(state): State<AppState>,
    auth: Option<Extension<AuthContext>>,
    Json(request): Json<ChatRequest>,
) -> Result<Response<Body>, GatewayError> {
    // Check if this is a streaming request
    if request.stream.unwrap_or(false) {
        // Handle streaming requests with SSE
        return handle_streaming_chat_completions(State(state), auth, Json(request)).await;
    }

    // Phase 4: Optimize request payload (request-side only); keep responses intact for compatibility
    let request_json = serde_json::to_value(&request)?;
    let optimized_request_json =
        crate::json_optimization::JsonOptimizer::optimize_request_payload(&request_json);
    let optimized_request: ChatRequest = serde_json::from_value(optimized_request_json)?;

    let (group, user_id) = dispatch_identity(auth.as_ref().map(|Extension(ctx)| ctx));
    let request_id = uuid::Uuid::new_v4().to_string();

    let rate_limit = state.config.auth.rate_limiting.requests_per_minute;
    let rate_decision =
        state
            .distributor
            .check_rate_limit(&user_id, rate_limit, INGRESS_RATE_LIMIT_WINDOW_SECS);
    if !rate_decision.allowed {
        let mut response = Response::builder()
            .status(StatusCode::TOO_MANY_REQUESTS)
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"error":{"message":"rate limit exceeded","type":"rate_limit_error"}}"#,
            ))
            .unwrap();
        set_header(&mut response, "retry-after", rate_decision.reset_at);
        set_header(&mut response, "x-ratelimit-limit", rate_limit);
        set_header(&mut response, "x-ratelimit-remaining", rate_decision.remaining);
        set_header(&mut response, "x-ratelimit-reset", rate_decision.reset_at);
        return Ok(response);
    }

    let start_time = std::time::Instant::now();
    let result = state
        .distributor
        .dispatch(&group, &user_id, &request_id, optimized_request.clone())
        .await;
    let latency = start_time.elapsed();

    match result {
        Ok((response, meta)) => {
            crate::metrics::record_request(
                crate::metrics::RequestMetricsBuilder::new(
                    "POST".to_string(),
                    "/v1/chat/completions".to_string(),
                    200,
                    latency,
                )
                .provider(meta.selected_model.clone())
                .model(optimized_request.model.clone())
                .input_tokens(response.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0))
                .output_tokens(response.usage.as_ref().map(|u| u.completion_tokens).unwrap_or(0))
                .cost_usd(0.0)
                .user_id(user_id.clone())
                .build(),
            )
            .await;

            let mut http_response = Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&response)?))
                .unwrap();
            apply_dispatch_headers(&mut http_response, &meta);
            set_header(&mut http_response, "x-ratelimit-limit", rate_limit);
            set_header(&mut http_response, "x-ratelimit-remaining", rate_decision.remaining);
            set_header(&mut http_response, "x-ratelimit-reset", rate_decision.reset_at);
            Ok(http_response)
        }
        Err(e) => {
            crate::metrics::record_request(
                crate::metrics::RequestMetricsBuilder::new(
                    "POST".to_string(),
                    "/v1/chat/completions".to_string(),
                    500,
                    latency,
                )
                .model(optimized_request.model.clone())
                .user_id(user_id)
                .build(),
            )
            .await;
            tracing::error!("Dispatch error: {}", e);
            Err(e)
        }
    }
}

async fn handle_streaming_chat_completions(
    State(state): State<AppState>,
    auth: Option<Extension<AuthContext>>,
    Json(request): Json<ChatRequest>,
) -> Result<Response<Body>, GatewayError> {
    // Phase 4: Optimize request payload
    let request_json = serde_json::to_value(&request)?;
    let optimized_request_json =
        crate::json_optimization::JsonOptimizer::optimize_request_payload(&request_json);
    let optimized_request: ChatRequest = serde_json::from_value(optimized_request_json)?;

    let (group, user_id) = dispatch_identity(auth.as_ref().map(|Extension(ctx)| ctx));
    let request_id = uuid::Uuid::new_v4().to_string();

    let rate_limit = state.config.auth.rate_limiting.requests_per_minute;
    let rate_decision =
        state
            .distributor
            .check_rate_limit(&user_id, rate_limit, INGRESS_RATE_LIMIT_WINDOW_SECS);
    if !rate_decision.allowed {
        let mut response = Response::builder()
            .status(StatusCode::TOO_MANY_REQUESTS)
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"error":{"message":"rate limit exceeded","type":"rate_limit_error"}}"#,
            ))
            .unwrap();
        set_header(&mut response, "retry-after", rate_decision.reset_at);
        set_header(&mut response, "x-ratelimit-limit", rate_limit);
        set_header(&mut response, "x-ratelimit-remaining", rate_decision.remaining);
        set_header(&mut response, "x-ratelimit-reset", rate_decision.reset_at);
        return Ok(response);
    }

    let dispatch = state
        .distributor
        .begin_stream(&group, &user_id, &request_id, optimized_request.clone())
        .await?;

    match dispatch {
        StreamDispatch::Cached(frames, meta) => {
            let body = Body::from_stream(async_stream::stream! {
                for frame in frames {
                    yield Ok::<axum::body::Bytes, std::io::Error>(frame.into());
                }
                yield Ok::<axum::body::Bytes, std::io::Error>("data: [DONE]\n\n".into());
            });

            let mut response = Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "text/event-stream")
                .header("cache-control", "no-cache")
                .header("connection", "keep-alive")
                .body(body)
                .unwrap();
            apply_dispatch_headers(&mut response, &meta);
            Ok(response)
        }
        StreamDispatch::Fresh {
            stream,
            meta,
            pre_consumed_quota,
        } => {
            let start_time = std::time::Instant::now();
            let (tx, rx) = tokio::sync::mpsc::channel::<String>(100);

            let distributor = state.distributor.clone();
            let mut stream = stream;
            let meta_for_task = meta.clone();
            let request_for_task = optimized_request.clone();
            let group_for_task = group.clone();
            let user_id_for_task = user_id.clone();
            let request_id_for_task = request_id.clone();

            tokio::spawn(async move {
                let mut capture = StreamCapture::new();
                let mut success = true;

                while let Some(chunk_result) = stream.next().await {
                    match chunk_result {
                        Ok(chunk) => {
                            let event_data = serde_json::to_string(&chunk).unwrap_or_default();
                            let sse_event = format!("data: {event_data}\n\n");
                            capture.push_line(&sse_event);

                            if (tx.send(sse_event).await).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::error!("Stream error: {}", e);
                            success = false;
                            let error_event = format!("data: {{\"error\": \"{e}\"}}\n\n");
                            let _ = tx.send(error_event).await;
                            break;
                        }
                    }
                }

                let _ = tx.send("data: [DONE]\n\n".to_string()).await;
                let latency = start_time.elapsed();

                let token_count = capture.token_count();
                let assistant_text = capture.assistant_text();
                distributor.finalize_stream(
                    &request_for_task,
                    &request_id_for_task,
                    &user_id_for_task,
                    &group_for_task,
                    &meta_for_task,
                    pre_consumed_quota,
                    capture.frames().to_vec(),
                    &assistant_text,
                    token_count,
                    success,
                );

                crate::metrics::record_request(
                    crate::metrics::RequestMetricsBuilder::new(
                        "POST".to_string(),
                        "/v1/chat/completions".to_string(),
                        if success { 200 } else { 502 },
                        latency,
                    )
                    .provider(meta_for_task.selected_model.clone())
                    .model(request_for_task.model.clone())
                    .input_tokens(0)
                    .output_tokens(token_count)
                    .cost_usd(0.0)
                    .user_id(user_id_for_task)
                    .build(),
                )
                .await;
            });

            let body = Body::from_stream(async_stream::stream! {
                let mut rx = rx;
                while let Some(event) = rx.recv().await {
                    yield Ok::<axum::body::Bytes, std::io::Error>(event.into());
                }
            });

            let mut response = Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "text/event-stream")
                .header("cache-control", "no-cache")
                .header("connection", "keep-alive")
                .body(body)
                .unwrap();
            apply_dispatch_headers(&mut response, &meta);
            set_header(&mut response, "x-ratelimit-limit", rate_limit);
            set_header(&mut response, "x-ratelimit-remaining", rate_decision.remaining);
            set_header(&mut response, "x-ratelimit-reset", rate_decision.reset_at);
            Ok(response)
        }
    }
}

pub async fn stream_chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<Event, Infallible>>>, GatewayError> {
    // Phase 4: Optimize request payload
    let request_json = serde_json::to_value(&request)?;
    let optimized_request_json =
        crate::json_optimization::JsonOptimizer::optimize_request_payload(&request_json);
    let optimized_request: ChatRequest = serde_json::from_value(optimized_request_json)?;

    // Route to appropriate provider using the client
    let start_time = std::time::Instant::now();
    let stream_result = state
        .client
        .stream_chat_completion(optimized_request.clone())
        .await;
    let latency = start_time.elapsed();

    match stream_result {
        Ok(stream) => {
            // Create a channel for streaming events
            let (tx, rx) = tokio::sync::mpsc::channel::<Result<Event, Infallible>>(100);

            // Spawn a task to handle the stream
            let mut stream = stream;
            tokio::spawn(async move {
                let mut total_tokens = 0;
                let mut content = String::new();

                while let Some(chunk_result) = stream.next().await {
                    match chunk_result {
                        Ok(chunk) => {
                            // Convert StreamChunk to SSE Event
                            let event_data = serde_json::to_string(&chunk).unwrap_or_default();
                            let event = Event::default().data(event_data);

                            // Track content for metrics
                            if let Some(choice) = chunk.choices.first() {
                                if let Some(text) = &choice.delta.content {
                                    content.push_str(text);
                                }
                            }

                            // Track tokens (StreamChunk doesn't have usage field)
                            // We'll track content length instead
                            total_tokens = content.len() as u32;

                            if (tx.send(Ok(event)).await).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::error!("Stream error: {}", e);
                            let error_event =
                                Event::default().data(format!("{{\"error\": \"{e}\"}}"));
                            let _ = tx.send(Ok(error_event)).await;
                            break;
                        }
                    }
                }

                // Send final event
                let final_event = Event::default().data("[DONE]");
                let _ = tx.send(Ok(final_event)).await;

                // Update metrics
                let provider = state.client.get_last_used_provider().await;
                crate::metrics::record_request(
                    crate::metrics::RequestMetricsBuilder::new(
                        "POST".to_string(),
                        "/v1/chat/completions".to_string(),
                        200,
                        latency,
                    )
                    .provider(provider.unwrap_or_default())
                    .model(optimized_request.model.clone())
                    .input_tokens(total_tokens)
                    .output_tokens(total_tokens)
                    .cost_usd(0.0) // Cost calculation would be done differently for streaming
                    .user_id(optimized_request.user.clone().unwrap_or_default())
                    .build(),
                )
                .await;
            });

            Ok(Sse::new(ReceiverStream::new(rx)))
        }
        Err(e) => {
            tracing::error!("Stream initialization error: {}", e);
            Err(GatewayError::Provider(
                gateway_core::error::ProviderError::ServiceUnavailable,
            ))
        }
    }
}

pub async fn completions(
    State(state): State<AppState>,
    Json(request): Json<Value>,
) -> Result<Json<Value>, GatewayError> {
    // Convert legacy completions format to chat completions format
    let chat_request = convert_legacy_completion_to_chat(request)?;

    // Use the existing chat completions logic
    let response = state.client.chat_completion(chat_request).await?;

    // Convert chat response back to legacy completions format
    let legacy_response = convert_chat_to_legacy_completion(response)?;

    Ok(Json(legacy_response))
}

pub async fn embeddings(
    State(state): State<AppState>,
    Json(request): Json<EmbeddingRequest>,
) -> Result<Json<EmbeddingResponse>, GatewayError> {
    // Route to appropriate provider using the client
    let start_time = std::time::Instant::now();
    let result = state.client.embedding(request).await;
    let latency = start_time.elapsed();

    // Record metrics
    crate::metrics::record_request(
        crate::metrics::RequestMetricsBuilder::new(
            "POST".to_string(),
            "/v1/embeddings".to_string(),
            200,
            latency,
        )
        .provider(
            state
                .client
                .get_last_used_provider()
                .await
                .unwrap_or_default(),
        )
        .build(),
    )
    .await;

    match result {
        Ok(response) => Ok(Json(response)),
        Err(e) => Err(GatewayError::Provider(ProviderError::Configuration {
            message: format!("Embedding request failed: {e}"),
        })),
    }
}

pub async fn image_generations(
    State(state): State<AppState>,
    Json(request): Json<ImageRequest>,
) -> Result<Json<ImageResponse>, GatewayError> {
    // Route to appropriate provider using the client
    let start_time = std::time::Instant::now();
    let result = state.client.image_generation(request).await;
    let latency = start_time.elapsed();

    // Record metrics
    crate::metrics::record_request(
        crate::metrics::RequestMetricsBuilder::new(
            "POST".to_string(),
            "/v1/images/generations".to_string(),
            200,
            latency,
        )
        .provider(
            state
                .client
                .get_last_used_provider()
                .await
                .unwrap_or_default(),
        )
        .build(),
    )
    .await;

    match result {
        Ok(response) => Ok(Json(response)),
        Err(e) => Err(GatewayError::Provider(ProviderError::Configuration {
            message: format!("Image generation request failed: {e}"),
        })),
    }
}

pub async fn audio_transcriptions(
    State(state): State<AppState>,
    Json(request): Json<AudioRequest>,
) -> Result<Json<AudioResponse>, GatewayError> {
    // Route to appropriate provider using the client
    let start_time = std::time::Instant::now();
    let result = state.client.audio_transcription(request).await;
    let latency = start_time.elapsed();

    // Record metrics
    crate::metrics::record_request(
        crate::metrics::RequestMetricsBuilder::new(
            "POST".to_string(),
            "/v1/audio/transcriptions".to_string(),
            200,
            latency,
        )
        .provider(
            state
                .client
                .get_last_used_provider()
                .await
                .unwrap_or_default(),
        )
        .build(),
    )
    .await;

    match result {
        Ok(response) => Ok(Json(response)),
        Err(e) => Err(GatewayError::Provider(ProviderError::Configuration {
            message: format!("Audio transcription request failed: {e}"),
        })),
    }
}

pub async fn text_to_speech(
    State(state): State<AppState>,
    Json(request): Json<SpeechRequest>,
) -> Result<Json<SpeechResponse>, GatewayError> {
    // Route to appropriate provider using the client
    let start_time = std::time::Instant::now();
    let result = state.client.text_to_speech(request).await;
    let latency = start_time.elapsed();

    // Record metrics
    crate::metrics::record_request(
        crate::metrics::RequestMetricsBuilder::new(
            "POST".to_string(),
            "/v1/audio/speech".to_string(),
            200,
            latency,
        )
        .provider(
            state
                .client
                .get_last_used_provider()
                .await
                .unwrap_or_default(),
        )
        .build(),
    )
    .await;

    match result {
        Ok(response) => Ok(Json(response)),
        Err(e) => Err(GatewayError::Provider(ProviderError::Configuration {
            message: format!("Text-to-speech request failed: {e}"),
        })),
    }
}

pub async fn list_models(State(state): State<AppState>) -> Result<Json<Value>, GatewayError> {
    let mut all_models = Vec::new();

    // Get models from all configured providers
    for (provider_name, provider_config) in &state.config.providers {
        if provider_config.enabled {
            // Create a list of supported models for each provider
            let models = match provider_name.as_str() {
                "openai" => vec![
                    "gpt-4",
                    "gpt-4-turbo",
                    "gpt-4-turbo-preview",
                    "gpt-3.5-turbo",
                    "gpt-3.5-turbo-16k",
                    "text-embedding-ada-002",
                    "text-embedding-3-small",
                    "text-embedding-3-large",
                    "dall-e-2",
                    "dall-e-3",
                    "whisper-1",
                    "tts-1",
                    "tts-1-hd",
                ],
                "anthropic" => vec![
                    "claude-opus-4-20250514",
                    "claude-sonnet-4-20250514",
                    "claude-3-7-sonnet-20250219",
                    "claude-3-5-sonnet-20241022",
                    "claude-3-5-haiku-20241022",
                    "claude-3-5-sonnet-20240620",
                    "claude-3-haiku-20240307",
                    "claude-3",
                    "claude",
                ],
                "azure-openai" => vec![
                    "gpt-4",
                    "gpt-4-turbo",
                    "gpt-35-turbo",
                    "text-embedding-ada-002",
                    "dall-e-3",
                ],
                "google-vertex-ai" => vec![
                    "chat-bison",
                    "text-bison",
                    "gemini-pro",
                    "textembedding-gecko",
                ],
                "gemini" => vec![
                    "gemini-1.5-pro",
                    "gemini-1.5-pro-latest",
                    "gemini-1.5-flash",
                    "gemini-1.5-flash-latest",
                    "gemini-1.0-pro",
                    "gemini-1.0-pro-vision",
                    "text-embedding-004",
                ],
                _ => vec![],
            };

            for model in models {
                all_models.push(json!({
                    "id": model,
                    "object": "model",
                    "created": 1677610602,
                    "owned_by": provider_name,
                    "provider": provider_name
                }));
            }
        }
    }

    let response = json!({
        "object": "list",
        "data": all_models
    });

    Ok(Json(response))
}

pub async fn health_check() -> Result<Json<Value>, GatewayError> {
    let response = json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    });

    Ok(Json(response))
}

pub async fn metrics(State(state): State<AppState>) -> Result<Json<Value>, GatewayError> {
    let metrics = crate::metrics::get_aggregated_metrics().await;

    // Convert metrics to JSON for easier manipulation
    let mut provider_stats = serde_json::to_value(&metrics.provider_stats)?;
    let model_stats = serde_json::to_value(&metrics.model_stats)?;

    // If there are no provider stats from metrics (no requests made yet),
    // include configured providers from the config
    if provider_stats.as_object().unwrap().is_empty() {
        let configured_providers: serde_json::Map<String, serde_json::Value> = state
            .config
            .providers
            .iter()
            .map(|(name, config)| {
                (
                    name.clone(),
                    json!({
                        "requests": 0,
                        "successful_requests": 0,
                        "failed_requests": 0,
                        "average_latency_ms": 0.0,
                        "p95_latency_ms": 0.0,
                        "total_cost_usd": 0.0,
                        "uptime_percentage": 100.0,
                        "error_rate": 0.0,
                        "last_request": null,
                        "enabled": config.enabled,
                        "base_url": config.base_url,
                        "timeout": config.timeout.as_secs()
                    }),
                )
            })
            .collect();
        provider_stats = serde_json::Value::Object(configured_providers);
    }

    // Transform data to match dashboard expectations
    let metrics_response = json!({
        "total_requests": metrics.total_requests,
        "average_latency_ms": metrics.average_latency_ms,
        "error_rate": metrics.error_rate,
        "requests_per_minute": metrics.requests_per_minute,
        "active_connections": metrics.active_connections,
        "total_cost_usd": metrics.total_cost_usd,
        "total_tokens": metrics.total_tokens,
        "uptime_seconds": metrics.uptime_seconds,
        "provider_stats": provider_stats,
        "model_stats": model_stats,
        "error_stats": {
            "error_types": metrics.error_stats.error_types,
            "total_errors": metrics.error_stats.total_errors,
            "error_rate": metrics.error_stats.error_rate,
            "most_common_error": metrics.error_stats.most_common_error
        },
        "cache_stats": metrics.cache_stats,
        "p50_latency_ms": metrics.p50_latency_ms,
        "p90_latency_ms": metrics.p90_latency_ms,
        "p95_latency_ms": metrics.p95_latency_ms,
        "p99_latency_ms": metrics.p99_latency_ms,
        "successful_requests": metrics.successful_requests,
        "failed_requests": metrics.failed_requests
    });

    Ok(Json(metrics_response))
}

pub async fn prometheus_metrics(
    State(_state): State<AppState>,
) -> Result<Response<Body>, GatewayError> {
    let prometheus_metrics = crate::metrics::get_prometheus_metrics().await;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
        .body(Body::from(prometheus_metrics))
        .unwrap())
}

pub async fn list_providers(State(state): State<AppState>) -> Result<Json<Value>, GatewayError> {
    let providers: Vec<Value> = state
        .config
        .providers
        .iter()
        .map(|(name, config)| {
            json!({
                "name": name,
                "enabled": config.enabled,
                "base_url": config.base_url,
                "timeout": config.timeout.as_secs(),
                "models": Vec::<String>::new() // Could be populated with actual supported models
            })
        })
        .collect();

    Ok(Json(json!({
        "providers": providers
    })))
}

pub async fn get_config(State(state): State<AppState>) -> Result<Json<Value>, GatewayError> {
    // Return a sanitized version of the config (without sensitive data)
    let sanitized_config = json!({
        "server": {
            "host": state.config.server.host,
            "port": state.config.server.port,
            "timeout": state.config.server.timeout.as_secs()
        },
        "providers": state.config.providers.keys().collect::<Vec<_>>(),
        "routing": {
            "strategy": state.config.routing.strategy,
            "health_check_interval": state.config.routing.health_check_interval.as_secs()
        },
        "cache": {
            "enabled": state.config.cache.enabled,
            "backend": state.config.cache.backend
        },
        "metrics": {
            "enabled": state.config.metrics.enabled
        }
    });

    Ok(Json(sanitized_config))
}

pub async fn get_circuit_breaker_metrics(
    State(state): State<AppState>,
) -> Result<Json<Value>, GatewayError> {
    let cb_metrics = state.client.get_circuit_breaker_metrics().await;
    let health_status = state.client.get_provider_health_status().await;

    let mut metrics_data = json!({});

    for (provider_id, metrics) in cb_metrics {
        let health = health_status.get(&provider_id).unwrap_or(&true);
        metrics_data[provider_id] = json!({
            "state": format!("{:?}", metrics.state),
            "failure_count": metrics.failure_count,
            "success_count": metrics.success_count,
            "last_failure_time": metrics.last_failure_time.map(|t| t.elapsed().as_secs()),
            "last_success_time": metrics.last_success_time.map(|t| t.elapsed().as_secs()),
            "is_healthy": health
        });
    }

    Ok(Json(metrics_data))
}

// Helper functions
#[allow(dead_code)]
fn estimate_tokens(request: &ChatRequest) -> u32 {
    let mut total_tokens = 0;

    for message in &request.messages {
        // Rough estimation: 1 token ≈ 4 characters
        total_tokens += message.content.as_text().len() as u32 / 4;
    }

    // Add buffer for system messages and formatting
    total_tokens += 50;

    total_tokens
}

fn determine_cache_ttl(request: &ChatRequest, latency: std::time::Duration) -> std::time::Duration {
    // Dynamic TTL based on request characteristics and performance
    let base_ttl = std::time::Duration::from_secs(3600); // 1 hour base

    // Adjust based on latency (faster responses get longer cache)
    let latency_factor = if latency < std::time::Duration::from_millis(100) {
        2.0
    } else if latency < std::time::Duration::from_millis(500) {
        1.5
    } else {
        1.0
    };

    // Adjust based on model (more expensive models get longer cache)
    let model_factor = if request.model.contains("gpt-4") || request.model.contains("claude-3") {
        1.5
    } else {
        1.0
    };

    // Adjust based on temperature (lower temperature = more deterministic = longer cache)
    let temp_factor = if let Some(temp) = request.temperature {
        if temp < 0.3 {
            1.5
        } else if temp < 0.7 {
            1.0
        } else {
            0.5
        }
    } else {
        1.0
    };

    let adjusted_ttl = base_ttl.mul_f64(latency_factor * model_factor * temp_factor);

    // Clamp between 5 minutes and 24 hours
    std::cmp::min(
        std::cmp::max(adjusted_ttl, std::time::Duration::from_secs(300)),
        std::time::Duration::from_secs(86400),
    )
}

// Helper functions for legacy completions conversion
fn convert_legacy_completion_to_chat(request: Value) -> Result<ChatRequest, GatewayError> {
    let model = request
        .get("model")
        .and_then(|v| v.as_str())
        .ok_or_else(|| GatewayError::InvalidRequest {
            message: "Model is required".to_string(),
        })?;

    let prompt = request
        .get("prompt")
        .and_then(|v| v.as_str())
        .ok_or_else(|| GatewayError::InvalidRequest {
            message: "Prompt is required".to_string(),
        })?;

    let max_tokens = request
        .get("max_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(1000) as u32;

    let temperature = request
        .get("temperature")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.7);

    let messages = vec![gateway_core::models::Message::user(prompt)];

    Ok(ChatRequest {
        model: model.to_string(),
        messages,
        max_tokens: Some(max_tokens),
        temperature: Some(temperature as f32),
        top_p: request
            .get("top_p")
            .and_then(|v| v.as_f64())
            .map(|v| v as f32),
        frequency_penalty: request
            .get("frequency_penalty")
            .and_then(|v| v.as_f64())
            .map(|v| v as f32),
        presence_penalty: request
            .get("presence_penalty")
            .and_then(|v| v.as_f64())
            .map(|v| v as f32),
        stop: request.get("stop").and_then(|v| v.as_array()).map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        }),
        user: request
            .get("user")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        stream: Some(false),
        tools: None,
        tool_choice: None,
    })
}

fn convert_chat_to_legacy_completion(
    response: gateway_core::models::ChatResponse,
) -> Result<Value, GatewayError> {
    let choice = response.choices.first().ok_or_else(|| {
        GatewayError::Provider(ProviderError::Configuration {
            message: "No choices in response".to_string(),
        })
    })?;

    let text = choice.message.content.as_text();

    Ok(json!({
        "id": response.id,
        "object": "text_completion",
        "created": response.created,
        "model": response.model,
        "choices": [{
            "text": text,
            "index": choice.index,
            "logprobs": choice.logprobs,
            "finish_reason": choice.finish_reason
        }],
        "usage": response.usage
    }))
}

//! # Gateway Caching Module
//!
//! This module provides comprehensive caching functionality for the Ultrafast Gateway,
//! supporting both in-memory and Redis-based caching with automatic expiration
//! and performance optimization.
//!
//! ## Overview
//!
//! The caching system provides:
//! - **Dual Backend Support**: In-memory and Redis caching
//! - **Automatic Expiration**: TTL-based cache invalidation
//! - **Fallback Mechanism**: Redis to memory fallback on failures
//! - **Performance Optimization**: Reduces API calls and improves response times
//! - **Cache Statistics**: Hit rates, memory usage, and performance metrics
//! - **Atomic Operations**: Thread-safe cache operations
//! - **Key Management**: Structured cache key generation
//!
//! ## Cache Backends
//!
//! ### In-Memory Caching
//!
//! Fast local caching suitable for single-instance deployments:
//! - **Low Latency**: Sub-millisecond access times
//! - **Memory Efficient**: Configurable size limits
//! - **Automatic Cleanup**: Expired entries removed automatically
//! - **Thread Safe**: Concurrent access support
//!
//! ### Redis Caching
//!
//! Distributed caching for multi-instance deployments:
//! - **Shared State**: Cache shared across multiple instances
//! - **Persistence**: Optional data persistence
//! - **High Availability**: Redis cluster support
//! - **Atomic Operations**: Thread-safe distributed operations
//!
//! ## Cache Key Strategy
//!
//! The system uses structured cache keys for different content types:
//!
//! - **Chat Completions**: `chat:{model}:{messages_hash}`
//! - **Embeddings**: `embedding:{model}:{input_hash}`
//! - **Image Generation**: `image:{model}:{prompt_hash}`
//!
//! ## Usage
//!
//! ```rust
//! use gateway_server::gateway_caching::{CacheManager, CacheKeyBuilder};
//! use gateway_server::config::CacheConfig;
//!
//! // Initialize cache manager
//! let config = CacheConfig {
//!     enabled: true,
//!     backend: CacheBackend::Redis { url: "redis://localhost:6379".to_string() },
//!     ttl: Duration::from_secs(3600),
//!     max_size: 1000,
//! };
//!
//! let cache_manager = CacheManager::new(config).await?;
//!
//! // Cache a chat completion
//! let key = CacheKeyBuilder::chat_completion_key("gpt-4", &messages_hash);
//! cache_manager.set(&key, response_data, None).await;
//!
//! // Retrieve from cache
//! if let Some(cached_response) = cache_manager.get(&key).await {
//!     return Ok(cached_response);
//! }
//! ```
//!
//! ## Configuration
//!
//! Cache behavior can be configured via `CacheConfig`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! backend = "redis"  # or "memory"
//! ttl = "1h"
//! max_size = 1000
//! ```
//!
//! ## Performance Benefits
//!
//! The caching system provides significant performance improvements:
//!
//! - **Reduced Latency**: Cached responses served in <1ms
//! - **Lower Costs**: Fewer API calls to providers
//! - **Improved Throughput**: Higher request handling capacity
//! - **Better User Experience**: Faster response times
//!
//! ## Cache Invalidation
//!
//! The system supports multiple invalidation strategies:
//!
//! - **TTL-based**: Automatic expiration after configured time
//! - **Manual Invalidation**: Explicit cache entry removal
//! - **Pattern-based**: Remove entries matching patterns
//! - **Full Clear**: Clear entire cache (admin only)
//!
//! ## Monitoring
//!
//! Cache performance can be monitored through:
//!
//! - **Hit Rates**: Cache effectiveness metrics
//! - **Memory Usage**: Current cache size and memory consumption
//! - **Latency**: Cache access times
//! - **Error Rates**: Cache operation failures

// Caching module with Redis integration and cache invalidation
use crate::config::{CacheBackend, CacheConfig};
use crate::gateway_error::GatewayError;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;

/// Global in-memory cache storage for fallback operations.
///
/// Uses `OnceLock` to ensure the cache store is initialized only once
/// and shared across all threads.
static CACHE: OnceLock<Arc<RwLock<HashMap<String, CacheEntry>>>> = OnceLock::new();

/// Get the global cache store instance.
///
/// Returns a reference to the global cache store, initializing it
/// if it hasn't been initialized yet.
fn get_cache_store() -> &'static Arc<RwLock<HashMap<String, CacheEntry>>> {
    CACHE.get_or_init(|| Arc::new(RwLock::new(HashMap::new())))
}

/// A cache entry containing data and metadata.
///
/// Represents a single cached item with its data, creation time,
/// and time-to-live (TTL) information.
///
/// # Example
///
/// ```rust
/// let entry = CacheEntry::new(
///     serde_json::json!({"response": "cached data"}),
///     Duration::from_secs(3600)
/// );
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cached data as a JSON value
    pub data: serde_json::Value,
    /// When this entry was created
    pub created_at: SystemTime,
    /// How long this entry should be considered valid
    pub ttl: Duration,
}

impl CacheEntry {
    /// Create a new cache entry.
    ///
    /// Initializes a cache entry with the provided data and TTL.
    ///
    /// # Arguments
    ///
    /// * `data` - The data to cache as a JSON value
    /// * `ttl` - Time-to-live duration for this entry
    ///
    /// # Returns
    ///
    /// Returns a new `CacheEntry` instance.
    pub fn new(data: serde_json::Value, ttl: Duration) -> Self {
        Self {
            data,
            created_at: SystemTime::now(),
            ttl,
        }
    }

    /// Check if this cache entry has expired.
    ///
    /// Determines if the entry has exceeded its TTL and should be removed.
    ///
    /// # Returns
    ///
    /// Returns `true` if the entry has expired, `false` otherwise.
    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed().unwrap_or(Duration::MAX) > self.ttl
    }
}

/// Cache manager for handling both Redis and in-memory caching.
///
/// Provides a unified interface for caching operations with automatic
/// fallback from Redis to in-memory storage on failures.
///
/// # Thread Safety
///
/// All operations are thread-safe and can be used concurrently.
///
/// # Example
///
/// ```rust
/// let config = CacheConfig {
///     enabled: true,
///     backend: CacheBackend::Redis { url: "redis://localhost:6379".to_string() },
///     ttl: Duration::from_secs(3600),
///     max_size: 1000,
/// };
///
/// let cache_manager = CacheManager::new(config).await?;
/// ```
#[derive(Debug)]
pub struct CacheManager {
    /// Cache configuration settings
    config: CacheConfig,
    /// Optional Redis client for distributed caching
    redis_client: Option<redis::Client>,
}

impl CacheManager {
    /// Create a new cache manager with the specified configuration.
    ///
    /// Initializes the cache manager with either Redis or in-memory backend
    /// based on the configuration. Falls back to in-memory if Redis is
    /// unavailable.
    ///
    /// # Arguments
    ///
    /// * `config` - Cache configuration including backend and settings
    ///
    /// # Returns
    ///
    /// Returns a new `CacheManager` instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache manager cannot be initialized.
    pub async fn new(config: CacheConfig) -> Result<Self, GatewayError> {
        let redis_client = match &config.backend {
            CacheBackend::Redis { url } => match redis::Client::open(url.as_str()) {
                Ok(client) => {
                    tracing::info!("Redis cache backend initialized successfully");
                    Some(client)
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to initialize Redis client, falling back to memory: {}",
                        e
                    );
                    None
                }
            },
            CacheBackend::Memory => {
                tracing::info!("Memory cache backend initialized");
                None
            }
        };

        Ok(Self {
            config,
            redis_client,
        })
    }

    /// Retrieve a value from the cache.
    ///
    /// Attempts to retrieve a value from Redis first, then falls back
    /// to in-memory storage. Returns `None` if the key doesn't exist
    /// or has expired.
    ///
    /// # Arguments
    ///
    /// * `key` - The cache key to retrieve
    ///
    /// # Returns
    ///
    /// Returns the cached value if found and not expired, `None` otherwise.
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        if !self.config.enabled {
            return None;
        }

        // Try Redis first if available, fallback to memory
        if self.redis_client.is_some() {
            match self.redis_get(key).await {
                Ok(Some(value)) => return Some(value),
                Ok(None) => return None,
                Err(e) => {
                    tracing::warn!("Redis error, falling back to memory: {}", e);
                    // Continue to memory fallback
                }
            }
        }

        // Memory cache (fallback or primary)
        let mut cache = get_cache_store().write().await;
        if let Some(entry) = cache.get(key) {
            if !entry.is_expired() {
                return Some(entry.data.clone());
            } else {
                cache.remove(key);
            }
        }
        None
    }

    /// Cache a value in the cache.
    ///
    /// Attempts to cache a value using Redis first, then falls back
    /// to in-memory storage.
    ///
    /// # Arguments
    ///
    /// * `key` - The cache key to set
    /// * `value` - The value to cache as a JSON value
    /// * `custom_ttl` - Optional custom TTL for this entry, overrides config
    ///
    /// # Example
    ///
    /// ```rust
    /// let key = CacheKeyBuilder::chat_completion_key("gpt-4", &messages_hash);
    /// cache_manager.set(&key, response_data, None).await;
    /// ```
    pub async fn set(&self, key: &str, value: serde_json::Value, custom_ttl: Option<Duration>) {
        if !self.config.enabled {
            return;
        }

        let ttl = custom_ttl.unwrap_or(self.config.ttl);
        let entry = CacheEntry::new(value.clone(), ttl);

        // Try Redis first if available, fallback to memory
        if self.redis_client.is_some() {
            match self.redis_set(key, &value, ttl).await {
                Ok(_) => return,
                Err(e) => {
                    tracing::warn!("Redis error, falling back to memory: {}", e);
                    // Continue to memory fallback
                }
            }
        }

        // Memory cache (fallback or primary)
        let mut cache = get_cache_store().write().await;

        // Implement simple LRU eviction if cache is full
        if cache.len() >= self.config.max_size {
            // Remove oldest entries (simple implementation)
            let mut entries: Vec<_> = cache
                .iter()
                .map(|(k, v)| (k.clone(), v.created_at))
                .collect();
            entries.sort_by_key(|(_, created_at)| *created_at);

            let remove_count = cache.len() - self.config.max_size + 1;
            for (key_to_remove, _) in entries.into_iter().take(remove_count) {
                cache.remove(&key_to_remove);
            }
        }

        cache.insert(key.to_string(), entry);
    }

    /// Invalidate a single cache entry.
    ///
    /// Attempts to invalidate a cache entry using Redis first, then falls back
    /// to in-memory storage.
    ///
    /// # Arguments
    ///
    /// * `key` - The cache key to invalidate
    ///
    /// # Example
    ///
    /// ```rust
    /// let key = CacheKeyBuilder::chat_completion_key("gpt-4", &messages_hash);
    /// cache_manager.invalidate(&key).await;
    /// ```
    pub async fn invalidate(&self, key: &str) {
        if !self.config.enabled {
            return;
        }

        // Try Redis first if available, fallback to memory
        if self.redis_client.is_some() {
            match self.redis_del(key).await {
                Ok(_) => return,
                Err(e) => {
                    tracing::warn!("Redis error, falling back to memory: {}", e);
                    // Continue to memory fallback
                }
            }
        }

        // Memory cache (fallback or primary)
        let mut cache = get_cache_store().write().await;
        cache.remove(key);
    }

    /// Clear the entire cache.
    ///
    /// Attempts to clear the cache using Redis first, then falls back
    /// to in-memory storage.
    ///
    /// # Example
    ///
    /// ```rust
    /// cache_manager.clear().await;
    /// ```
    pub async fn clear(&self) {
        if !self.config.enabled {
            return;
        }

        // Try Redis first if available, fallback to memory
        if self.redis_client.is_some() {
            match self.redis_clear().await {
                Ok(_) => return,
                Err(e) => {
                    tracing::warn!("Redis error, falling back to memory: {}", e);
                    // Continue to memory fallback
                }
            }
        }

        // Memory cache (fallback or primary)
        let mut cache = get_cache_store().write().await;
        cache.clear();
    }

    /// Get current cache statistics.
    ///
    /// Returns statistics about the cache, including total entries,
    /// expired entries, and memory usage.
    ///
    /// # Returns
    ///
    /// Returns a `CacheStats` struct containing the statistics.
    pub async fn stats(&self) -> CacheStats {
        match &self.config.backend {
            CacheBackend::Memory => {
                let cache = get_cache_store().read().await;
                CacheStats {
                    total_entries: cache.len(),
                    expired_entries: cache.values().filter(|entry| entry.is_expired()).count(),
                    memory_usage_bytes: cache.len() * std::mem::size_of::<CacheEntry>(),
                }
            }
            CacheBackend::Redis { url: _ } => CacheStats {
                total_entries: 0,
                expired_entries: 0,
                memory_usage_bytes: 0,
            },
        }
    }

    // Helper methods for memory cache
    #[allow(dead_code)]
    async fn get_from_memory(&self, key: &str) -> Option<serde_json::Value> {
        let mut cache = get_cache_store().write().await;
        if let Some(entry) = cache.get(key) {
            if !entry.is_expired() {
                return Some(entry.data.clone());
            } else {
                cache.remove(key);
            }
        }
        None
    }

    #[allow(dead_code)]
    async fn set_in_memory(&self, key: &str, entry: CacheEntry) {
        let mut cache = get_cache_store().write().await;
        cache.insert(key.to_string(), entry);
    }

    #[allow(dead_code)]
    async fn invalidate_memory(&self, key: &str) {
        let mut cache = get_cache_store().write().await;
        cache.remove(key);
    }

    #[allow(dead_code)]
    async fn clear_memory(&self) {
        let mut cache = get_cache_store().write().await;
        cache.clear();
    }

    // Redis implementation methods using async connections
    async fn redis_get(
        &self,
        key: &str,
    ) -> Result<Option<serde_json::Value>, Box<dyn std::error::Error + Send + Sync>> {
        let client = match self.redis_client.as_ref() {
            Some(c) => c,
            None => return Err(std::io::Error::other("Redis client not initialized").into()),
        };

        let mut conn = client.get_multiplexed_tokio_connection().await?;
        let value_str: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;

        match value_str {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    async fn redis_set(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let client = match self.redis_client.as_ref() {
            Some(c) => c,
            None => return Err(std::io::Error::other("Redis client not initialized").into()),
        };

        let mut conn = client.get_multiplexed_tokio_connection().await?;
        let value_str = serde_json::to_string(value)?;
        let ttl_seconds = ttl.as_secs();

        if ttl_seconds > 0 {
            let _: () = redis::cmd("SETEX")
                .arg(key)
                .arg(ttl_seconds as i64)
                .arg(&value_str)
                .query_async(&mut conn)
                .await?;
        } else {
            let _: () = redis::cmd("SET")
                .arg(key)
                .arg(&value_str)
                .query_async(&mut conn)
                .await?;
        }

        Ok(())
    }

    async fn redis_del(&self, key: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let client = match self.redis_client.as_ref() {
            Some(c) => c,
            None => return Err(std::io::Error::other("Redis client not initialized").into()),
        };

        let mut conn = client.get_multiplexed_tokio_connection().await?;
        let _: i32 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }

    async fn redis_clear(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let client = match self.redis_client.as_ref() {
            Some(c) => c,
            None => return Err(std::io::Error::other("Redis client not initialized").into()),
        };

        let mut conn = client.get_multiplexed_tokio_connection().await?;
        let _: String = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        Ok(())
    }

    /// Returns true if Redis backend is available
    pub fn has_redis(&self) -> bool {
        self.redis_client.is_some()
    }

    /// Atomically increment a key with an expiry. If the key is new, expiry is set.
    pub async fn incr_with_expiry(
        &self,
        key: &str,
        expiry_secs: usize,
    ) -> Result<i64, GatewayError> {
        let client = match &self.redis_client {
            Some(c) => c,
            None => {
                return Err(GatewayError::Cache {
                    message: "Redis backend not initialized".to_string(),
                })
            }
        };

        let mut conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| GatewayError::Cache {
                message: format!("Failed to open Redis connection: {e}"),
            })?;

        // INCR then set EXPIRE only if this was the first increment
        let count: i64 = conn.incr(key, 1).await.map_err(|e| GatewayError::Cache {
            message: format!("Redis INCR error: {e}"),
        })?;

        if count == 1 {
            let _: () =
                conn.expire(key, expiry_secs as i64)
                    .await
                    .map_err(|e| GatewayError::Cache {
                        message: format!("Redis EXPIRE error: {e}"),
                    })?;
        }

        Ok(count)
    }

    /// Atomically increment a key by a specific amount with an expiry.
    /// If the key is new, expiry is set.
    pub async fn incr_by_with_expiry(
        &self,
        key: &str,
        by: i64,
        expiry_secs: usize,
    ) -> Result<i64, GatewayError> {
        let client = match &self.redis_client {
            Some(c) => c,
            None => {
                return Err(GatewayError::Cache {
                    message: "Redis backend not initialized".to_string(),
                })
            }
        };

        let mut conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| GatewayError::Cache {
                message: format!("Failed to open Redis connection: {e}"),
            })?;

        let count: i64 = redis::cmd("INCRBY")
            .arg(key)
            .arg(by)
            .query_async(&mut conn)
            .await
            .map_err(|e| GatewayError::Cache {
                message: format!("Redis INCRBY error: {e}"),
            })?;

        if count == by {
            let _: () =
                conn.expire(key, expiry_secs as i64)
                    .await
                    .map_err(|e| GatewayError::Cache {
                        message: format!("Redis EXPIRE error: {e}"),
                    })?;
        }

        Ok(count)
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub memory_usage_bytes: usize,
}

// Cache key generation utilities
pub struct CacheKeyBuilder;

impl CacheKeyBuilder {
    /// Generate a cache key for a chat completion.
    ///
    /// Constructs a key using the model name and a hash of the messages.
    ///
    /// # Arguments
    ///
    /// * `model` - The name of the model used for the completion
    /// * `messages_hash` - A hash of the messages sent to the model
    ///
    /// # Returns
    ///
    /// Returns a string key.
    pub fn chat_completion_key(model: &str, messages_hash: &str) -> String {
        format!("chat:{model}:{messages_hash}")
    }

    /// Generate a cache key for an embedding.
    ///
    /// Constructs a key using the model name and a hash of the input data.
    ///
    /// # Arguments
    ///
    /// * `model` - The name of the model used for the embedding
    /// * `input_hash` - A hash of the input data for the embedding
    ///
    /// # Returns
    ///
    /// Returns a string key.
    pub fn embedding_key(model: &str, input_hash: &str) -> String {
        format!("embedding:{model}:{input_hash}")
    }

    /// Generate a cache key for image generation.
    ///
    /// Constructs a key using the model name and a hash of the prompt.
    ///
    /// # Arguments
    ///
    /// * `model` - The name of the model used for image generation
    /// * `prompt_hash` - A hash of the prompt used for image generation
    ///
    /// # Returns
    ///
    /// Returns a string key.
    pub fn image_generation_key(model: &str, prompt_hash: &str) -> String {
        format!("image:{model}:{prompt_hash}")
    }

    /// Generate a hash for content to be cached.
    ///
    /// Uses a hasher to create a consistent hash of the input string.
    ///
    /// # Arguments
    ///
    /// * `content` - The string content to hash
    ///
    /// # Returns
    ///
    /// Returns a string hash.
    pub fn hash_content(content: &str) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        format!("{:x}", hasher.finish())
    }
}

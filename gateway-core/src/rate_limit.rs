//! Sharded local sliding-window and Lua-scripted remote rate limiting.
//!
//! The local backend is new (the teacher has no sharded limiter); it uses
//! the hand-rolled FNV-1a hash in [`crate::common::fnv`] for shard
//! selection. The remote backend mirrors the `redis`-crate usage pattern
//! already present in the workspace's caching code, via `redis::Script`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::common::fnv::fnv1a_32;

const SHARD_COUNT: usize = 256;

/// Outcome of a rate-limit check, identical across both backends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: u64,
}

struct Entry {
    timestamps: Vec<u64>,
    last_access: u64,
}

#[derive(Default)]
struct Shard {
    entries: Mutex<HashMap<String, Entry>>,
}

/// 256-shard in-memory sliding-window limiter. Contention on any given key
/// is bounded to 1/256 since each shard owns an independent lock.
pub struct LocalRateLimiter {
    shards: Vec<Shard>,
}

impl Default for LocalRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRateLimiter {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Shard::default()).collect(),
        }
    }

    fn shard_for(&self, key: &str) -> &Shard {
        let idx = (fnv1a_32(key.as_bytes()) as usize) % SHARD_COUNT;
        &self.shards[idx]
    }

    /// Check and (if allowed) record one request against `key` within a
    /// sliding window of `window_seconds`, capped at `limit` requests.
    pub fn check(&self, key: &str, limit: u32, window_seconds: u64) -> Decision {
        let shard = self.shard_for(key);
        let now = now_unix();
        let mut entries = shard.entries.lock().expect("rate limiter shard poisoned");
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            timestamps: Vec::new(),
            last_access: now,
        });

        let cutoff = now.saturating_sub(window_seconds);
        entry.timestamps.retain(|&t| t > cutoff);
        entry.last_access = now;

        if (entry.timestamps.len() as u32) < limit {
            entry.timestamps.push(now);
            Decision {
                allowed: true,
                remaining: limit - entry.timestamps.len() as u32,
                reset_at: now + window_seconds,
            }
        } else {
            let reset_at = entry.timestamps.first().copied().unwrap_or(now) + window_seconds;
            Decision {
                allowed: false,
                remaining: 0,
                reset_at,
            }
        }
    }

    /// Evict entries across a shard slice whose `last_access` predates
    /// `max_age`. Intended to be called by one of 16 background sweepers,
    /// each responsible for `SHARD_COUNT / 16` shards.
    pub fn sweep(&self, shard_indices: impl IntoIterator<Item = usize>, max_age: Duration) {
        let now = now_unix();
        let max_age_secs = max_age.as_secs();
        for idx in shard_indices {
            let Some(shard) = self.shards.get(idx) else {
                continue;
            };
            let mut entries = shard.entries.lock().expect("rate limiter shard poisoned");
            entries.retain(|_, entry| now.saturating_sub(entry.last_access) <= max_age_secs);
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Lua scripts for the remote, atomic rate limiter. Loaded once at startup;
/// `redis::Script` caches the SHA1 digest and transparently falls back to
/// `EVAL` on a "script not found" error, matching the teacher's reqwest
/// client reuse pattern of creating expensive resources once and sharing
/// them behind an `Arc`.
pub struct RemoteScripts {
    pub sliding_window: redis::Script,
    pub token_bucket: redis::Script,
    pub quota_decrement: redis::Script,
}

impl Default for RemoteScripts {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteScripts {
    pub fn new() -> Self {
        Self {
            sliding_window: redis::Script::new(SLIDING_WINDOW_SCRIPT),
            token_bucket: redis::Script::new(TOKEN_BUCKET_SCRIPT),
            quota_decrement: redis::Script::new(QUOTA_DECREMENT_SCRIPT),
        }
    }
}

/// Atomic sliding window over a sorted set keyed `ratelimit:<key>`. Members
/// are `"<timestamp>-<random>"` so concurrent requests in the same
/// millisecond don't collide; scores are the timestamp so the expiry trim
/// is a cheap `ZREMRANGEBYSCORE`.
const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local member = ARGV[4]

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)

if count < limit then
    redis.call('ZADD', key, now, member)
    redis.call('EXPIRE', key, window)
    return {1, limit - count - 1, now + window}
else
    local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
    local reset_at = now + window
    if oldest[2] ~= nil then
        reset_at = tonumber(oldest[2]) + window
    end
    return {0, 0, reset_at}
end
"#;

/// Token bucket for non-windowed limits: `capacity`, `refillRate` tokens/sec,
/// `tokensRequested`. State is `(tokens, lastRefillUnix)` stored as a hash.
const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local requested = tonumber(ARGV[3])
local now = tonumber(ARGV[4])

local bucket = redis.call('HMGET', key, 'tokens', 'last_refill')
local tokens = tonumber(bucket[1]) or capacity
local last_refill = tonumber(bucket[2]) or now

local elapsed = math.max(0, now - last_refill)
tokens = math.min(capacity, tokens + elapsed * refill_rate)

if tokens >= requested then
    tokens = tokens - requested
    redis.call('HMSET', key, 'tokens', tokens, 'last_refill', now)
    redis.call('EXPIRE', key, math.ceil(capacity / refill_rate) + 1)
    return {1, tokens}
else
    redis.call('HMSET', key, 'tokens', tokens, 'last_refill', now)
    return {0, tokens}
end
"#;

/// Atomically decrements a quota counter, clamped at zero, returning the
/// new value and whether the decrement actually applied.
const QUOTA_DECREMENT_SCRIPT: &str = r#"
local key = KEYS[1]
local amount = tonumber(ARGV[1])

local current = tonumber(redis.call('GET', key) or '0')
if current < amount then
    return {current, 0}
end

local new_value = redis.call('DECRBY', key, amount)
return {new_value, 1}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_requests_under_limit() {
        let limiter = LocalRateLimiter::new();
        for _ in 0..5 {
            let decision = limiter.check("user:1", 5, 60);
            assert!(decision.allowed);
        }
        let decision = limiter.check("user:1", 5, 60);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn distinct_keys_do_not_share_counters() {
        let limiter = LocalRateLimiter::new();
        for _ in 0..3 {
            assert!(limiter.check("user:a", 3, 60).allowed);
        }
        assert!(!limiter.check("user:a", 3, 60).allowed);
        assert!(limiter.check("user:b", 3, 60).allowed);
    }

    #[test]
    fn sweep_evicts_stale_entries() {
        let limiter = LocalRateLimiter::new();
        limiter.check("stale", 10, 60);
        limiter.sweep(0..SHARD_COUNT, Duration::from_secs(0));
        // A fresh check on the same key should start a brand-new window.
        let decision = limiter.check("stale", 1, 60);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
    }
}

//! Prompt -> response reuse: an exact-fingerprint cache and an in-process
//! semantic (vector n-gram) cache, plus SSE streaming capture.
//!
//! New module; there is no teacher counterpart for prompt caching (the
//! teacher's [`crate::cache`] keys on a `DefaultHasher` of the request and
//! has no semantic variant). The exact cache's fingerprint and the
//! semantic cache's bounded-size/eviction shape borrow the capacity and TTL
//! idiom from [`crate::cache::InMemoryCache`], generalized to the `sha256`
//! fingerprint and cosine-similarity lookup the specification requires.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::{ChatRequest, Message};

/// Default TTL for a freshly stored exact-cache entry.
pub const DEFAULT_EXACT_TTL: Duration = Duration::from_secs(3600);
/// Default minimum cosine similarity for a semantic cache hit.
pub const DEFAULT_SEMANTIC_THRESHOLD: f64 = 0.85;
/// Dimensionality of the semantic embedding vector.
const EMBEDDING_DIM: usize = 256;
/// Bound on the streaming capture buffer; captures longer than this are
/// truncated and the cache write is skipped.
pub const MAX_CAPTURE_BYTES: usize = 10 * 1024 * 1024;

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Canonical JSON of the fields that determine cache identity, serialized
/// in a fixed field order so semantically identical requests always hash
/// the same regardless of incidental field ordering upstream.
fn canonical_request_json(model: &str, messages: &[Message]) -> String {
    #[derive(Serialize)]
    struct CanonicalMessage<'a> {
        role: &'a str,
        content: String,
    }
    #[derive(Serialize)]
    struct Canonical<'a> {
        model: &'a str,
        messages: Vec<CanonicalMessage<'a>>,
    }

    let canonical = Canonical {
        model,
        messages: messages
            .iter()
            .map(|m| CanonicalMessage {
                role: match m.role {
                    crate::models::Role::System => "system",
                    crate::models::Role::User => "user",
                    crate::models::Role::Assistant => "assistant",
                    crate::models::Role::Tool => "tool",
                },
                content: m.content.as_text(),
            })
            .collect(),
    };
    serde_json::to_string(&canonical).unwrap_or_default()
}

/// `sha256(model ∥ canonical(messages))`, the exact-cache key.
pub fn fingerprint(model: &str, messages: &[Message]) -> String {
    let json = canonical_request_json(model, messages);
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn fingerprint_request(request: &ChatRequest) -> String {
    fingerprint(&request.model, &request.messages)
}

/// A stored exact-cache payload: enough to reconstruct a non-streaming
/// completion or replay an SSE capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub content: String,
    pub model: String,
    pub created_at: u64,
    pub tokens_used: u32,
    /// Raw SSE frames captured during the original stream, in order,
    /// excluding the terminal `data: [DONE]` line. Empty for a cache entry
    /// populated from a non-streaming response.
    pub sse_frames: Vec<String>,
}

struct StoredEntry {
    entry: CacheEntry,
    expires_at: u64,
}

/// Exact-hash prompt cache. Enabled only when a remote KV store is
/// configured in a full deployment; this struct is backend-agnostic and
/// this implementation provides the in-process backing store plus the
/// key-derivation and TTL logic common to any backend.
#[derive(Default)]
pub struct ExactCache {
    entries: RwLock<HashMap<String, StoredEntry>>,
}

impl ExactCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, fp: &str) -> Option<CacheEntry> {
        let entries = self.entries.read().expect("exact cache lock poisoned");
        let stored = entries.get(fp)?;
        if stored.expires_at <= now_unix() {
            return None;
        }
        Some(stored.entry.clone())
    }

    pub fn store(&self, fp: String, entry: CacheEntry, ttl: Duration) {
        let mut entries = self.entries.write().expect("exact cache lock poisoned");
        entries.insert(
            fp,
            StoredEntry {
                entry,
                expires_at: now_unix() + ttl.as_secs(),
            },
        );
    }

    /// Best-effort removal of every entry. Mirrors the "Redis SCAN is
    /// best-effort" consistency the specification leaves unresolved: a
    /// concurrent `store` racing this call may survive it.
    pub fn clear(&self) {
        self.entries.write().expect("exact cache lock poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("exact cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Coarse model-family tag so semantic lookups never cross providers.
pub fn model_family(model: &str) -> &'static str {
    let m = model.to_lowercase();
    if m.starts_with("gpt-4") {
        "gpt-4"
    } else if m.starts_with("gpt-3.5") {
        "gpt-3.5"
    } else if m.starts_with("claude") {
        "claude"
    } else if m.starts_with("gemini") {
        "gemini"
    } else if m.starts_with("llama") {
        "llama"
    } else if m.starts_with("mistral") {
        "mistral"
    } else {
        "other"
    }
}

/// A unit-norm 256-dim embedding, produced by [`generate_embedding`].
#[derive(Debug, Clone)]
pub struct Embedding(pub [f32; EMBEDDING_DIM]);

impl Embedding {
    pub fn cosine_similarity(&self, other: &Embedding) -> f64 {
        let mut dot = 0.0f64;
        for i in 0..EMBEDDING_DIM {
            dot += self.0[i] as f64 * other.0[i] as f64;
        }
        // Both vectors are unit-normalized by construction, so the dot
        // product is already the cosine similarity.
        dot
    }
}

fn hash_to_index(s: &str) -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::hash::Hash::hash(s, &mut hasher);
    (std::hash::Hasher::finish(&hasher) as usize) % EMBEDDING_DIM
}

/// Cheap bag-of-n-grams embedding: character n-grams (2,3,4) each
/// contribute `1/n` at a hashed index, whitespace-delimited words each
/// contribute `2.0`, then the vector is unit-normalized. This is not a
/// learned embedding; it is a deterministic, dependency-free similarity
/// signal adequate for near-duplicate prompt detection.
pub fn generate_embedding(text: &str) -> Embedding {
    let normalized = text.to_lowercase();
    let normalized = normalized.trim();
    let mut vector = [0f32; EMBEDDING_DIM];

    let chars: Vec<char> = normalized.chars().collect();
    for n in [2usize, 3, 4] {
        if chars.len() < n {
            continue;
        }
        for window in chars.windows(n) {
            let gram: String = window.iter().collect();
            let idx = hash_to_index(&gram);
            vector[idx] += 1.0 / n as f32;
        }
    }

    for word in normalized.split_whitespace() {
        let idx = hash_to_index(word);
        vector[idx] += 2.0;
    }

    let norm = vector.iter().map(|v| (*v as f64).powi(2)).sum::<f64>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v = (*v as f64 / norm) as f32;
        }
    }

    Embedding(vector)
}

/// A stored semantic cache entry.
#[derive(Debug, Clone)]
pub struct SemanticEntry {
    pub vector: Embedding,
    pub model_family: &'static str,
    pub response: String,
    pub model: String,
    pub query_preview: String,
    pub tokens: u32,
    pub created_at: u64,
    pub hit_count: u64,
}

/// In-process semantic cache over a capped number of entries. Guarded by a
/// single reader-writer lock: scans run under the read lock, inserts and
/// evictions under the write lock, acceptable because the cache is bounded
/// and scans are rare relative to the request rate.
pub struct SemanticCache {
    max_size: usize,
    threshold: f64,
    entries: RwLock<HashMap<String, SemanticEntry>>,
}

impl SemanticCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            threshold: DEFAULT_SEMANTIC_THRESHOLD,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Highest-similarity hit within the query's model family, or `None`
    /// when nothing clears `threshold`. Updates the winning entry's hit
    /// count on a hit.
    pub fn lookup(&self, model: &str, query: &str) -> Option<SemanticEntry> {
        let family = model_family(model);
        let query_vec = generate_embedding(query);

        let best_key = {
            let entries = self.entries.read().expect("semantic cache lock poisoned");
            entries
                .iter()
                .filter(|(_, e)| e.model_family == family)
                .map(|(k, e)| (k.clone(), query_vec.cosine_similarity(&e.vector)))
                .filter(|(_, sim)| *sim >= self.threshold)
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(k, _)| k)
        }?;

        let mut entries = self.entries.write().expect("semantic cache lock poisoned");
        let entry = entries.get_mut(&best_key)?;
        entry.hit_count += 1;
        Some(entry.clone())
    }

    /// Store a response under a vector-derived key, evicting the lowest-
    /// scoring 10% (`score = ageHours - 10*hitCount`, lowest score evicted
    /// first) when at capacity.
    pub fn store(&self, model: &str, query: &str, response: String, tokens: u32) {
        let family = model_family(model);
        let vector = generate_embedding(query);
        let key = format!("{family}:{:x}", {
            let mut hasher = Sha256::new();
            hasher.update(query.as_bytes());
            hasher.update(model.as_bytes());
            u64::from_le_bytes(hasher.finalize()[..8].try_into().unwrap_or([0u8; 8]))
        });

        let preview: String = query.chars().take(200).collect();
        let mut entries = self.entries.write().expect("semantic cache lock poisoned");

        if entries.len() >= self.max_size && !entries.contains_key(&key) {
            self.evict_locked(&mut entries);
        }

        entries.insert(
            key,
            SemanticEntry {
                vector,
                model_family: family,
                response,
                model: model.to_string(),
                query_preview: preview,
                tokens,
                created_at: now_unix(),
                hit_count: 0,
            },
        );
    }

    fn evict_locked(&self, entries: &mut HashMap<String, SemanticEntry>) {
        let now = now_unix();
        let to_evict = (entries.len() / 10).max(1);
        let mut scored: Vec<(String, f64)> = entries
            .iter()
            .map(|(k, e)| {
                let age_hours = (now.saturating_sub(e.created_at)) as f64 / 3600.0;
                (k.clone(), age_hours - 10.0 * e.hit_count as f64)
            })
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        for (key, _) in scored.into_iter().rev().take(to_evict) {
            entries.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("semantic cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded tee buffer for an in-flight SSE stream: each line is appended
/// here as it is forwarded to the client. Once the stream ends, the
/// accumulated frames (minus the terminal `[DONE]` marker) become the
/// exact-cache payload, written asynchronously so the request path is
/// never blocked on the cache write.
#[derive(Debug, Default)]
pub struct StreamCapture {
    frames: Vec<String>,
    bytes: usize,
    truncated: bool,
}

impl StreamCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one SSE `data: ...` line. No-ops once the buffer has been
    /// truncated for exceeding [`MAX_CAPTURE_BYTES`].
    pub fn push_line(&mut self, line: &str) {
        if self.truncated {
            return;
        }
        if line.trim() == "data: [DONE]" {
            return;
        }
        if self.bytes + line.len() > MAX_CAPTURE_BYTES {
            self.truncated = true;
            self.frames.clear();
            return;
        }
        self.bytes += line.len();
        self.frames.push(line.to_string());
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn frames(&self) -> &[String] {
        &self.frames
    }

    /// Parse `usage.total_tokens` out of the captured frames if any frame
    /// carries it, else approximate as `words/2`.
    pub fn token_count(&self) -> u32 {
        for frame in &self.frames {
            let Some(json_part) = frame.strip_prefix("data: ") else {
                continue;
            };
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(json_part) {
                if let Some(total) = value
                    .get("usage")
                    .and_then(|u| u.get("total_tokens"))
                    .and_then(|t| t.as_u64())
                {
                    return total as u32;
                }
            }
        }
        let words: usize = self
            .frames
            .iter()
            .map(|f| f.split_whitespace().count())
            .sum();
        (words / 2).max(1) as u32
    }

    /// Extract the concatenated assistant-delta text across every captured
    /// frame, for synthesizing a non-streaming completion from a cached
    /// stream.
    pub fn assistant_text(&self) -> String {
        let mut out = String::new();
        for frame in &self.frames {
            let Some(json_part) = frame.strip_prefix("data: ") else {
                continue;
            };
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(json_part) {
                if let Some(delta) = value
                    .get("choices")
                    .and_then(|c| c.get(0))
                    .and_then(|c| c.get("delta"))
                    .and_then(|d| d.get("content"))
                    .and_then(|c| c.as_str())
                {
                    out.push_str(delta);
                }
            }
        }
        out
    }
}

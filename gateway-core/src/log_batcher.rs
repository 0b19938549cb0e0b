//! Async log batcher: decouples billing/observability writes from the
//! request path by buffering log rows and flushing them periodically (or
//! immediately, once the buffer fills) in a single background task.
//!
//! New module; the buffer-swap-and-flush shape mirrors the request/retry
//! bookkeeping idiom in [`crate::retry`], generalized from a per-request
//! backoff loop to a shared, mutex-guarded append buffer drained by a
//! ticker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// One billed/observed request, ready to be persisted to the external log
/// store. Fields mirror the data the distributor accumulates in a
/// `RequestContext` over the lifetime of a request.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LogEntry {
    pub request_id: String,
    pub user_id: String,
    pub group: String,
    pub token_id: i64,
    pub requested_model: String,
    pub actual_model: String,
    pub channel_id: i64,
    pub selection_reason: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub quota_used: i64,
    pub status_code: u16,
    pub latency_ms: u64,
    pub created_at: u64,
}

/// Sink the batcher flushes drained batches to. Implemented by whatever
/// owns the external relational store; kept as a trait so the batcher
/// itself has no database dependency.
#[async_trait::async_trait]
pub trait LogSink: Send + Sync {
    /// Persist a chunk of entries in a single transaction. Errors are
    /// logged by the caller and the batch is dropped: log persistence is
    /// at-most-once, never a source of request-path failure.
    async fn write_batch(&self, entries: &[LogEntry]) -> Result<(), anyhow::Error>;
}

const DEFAULT_CAPACITY: usize = 1_000;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const CHUNK_SIZE: usize = 100;

struct Inner {
    buffer: Mutex<Vec<LogEntry>>,
    capacity: usize,
    notify_full: Notify,
    stopping: AtomicBool,
}

/// Singleton-shaped buffered log writer. Construct one, call
/// [`AsyncLogBatcher::spawn`] to start its background flusher, `add` from
/// every request, and `stop` during shutdown to drain the final batch.
pub struct AsyncLogBatcher {
    inner: Arc<Inner>,
    sink: Arc<dyn LogSink>,
    flush_interval: Duration,
}

impl AsyncLogBatcher {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self::with_config(sink, DEFAULT_CAPACITY, DEFAULT_FLUSH_INTERVAL)
    }

    pub fn with_config(sink: Arc<dyn LogSink>, capacity: usize, flush_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                buffer: Mutex::new(Vec::with_capacity(capacity)),
                capacity,
                notify_full: Notify::new(),
                stopping: AtomicBool::new(false),
            }),
            sink,
            flush_interval,
        }
    }

    /// Append one entry under the buffer mutex. If this fills the buffer,
    /// wakes the flusher to run an immediate out-of-cycle flush.
    pub fn add(&self, entry: LogEntry) {
        let should_wake = {
            let mut buffer = self.inner.buffer.lock().expect("log batcher lock poisoned");
            buffer.push(entry);
            buffer.len() >= self.inner.capacity
        };
        if should_wake {
            self.inner.notify_full.notify_one();
        }
    }

    fn drain(&self) -> Vec<LogEntry> {
        let mut buffer = self.inner.buffer.lock().expect("log batcher lock poisoned");
        std::mem::take(&mut *buffer)
    }

    async fn flush(&self) {
        let drained = self.drain();
        if drained.is_empty() {
            return;
        }
        for chunk in drained.chunks(CHUNK_SIZE) {
            if let Err(err) = self.sink.write_batch(chunk).await {
                tracing::warn!(error = %err, rows = chunk.len(), "log batch flush failed, dropping batch");
            }
        }
    }

    /// Start the background ticker/wake loop. Returns a handle joined by
    /// [`AsyncLogBatcher::stop`].
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let timer = tokio::time::sleep(this.flush_interval);
                tokio::select! {
                    _ = timer => {}
                    _ = this.inner.notify_full.notified() => {}
                }
                this.flush().await;
                if this.inner.stopping.load(Ordering::Acquire) {
                    this.flush().await;
                    break;
                }
            }
        })
    }

    /// Signal the flusher to stop, wake it for a final pass, then drain
    /// once more synchronously so no entries added between the wake and
    /// the task's exit are lost.
    pub async fn stop(&self, handle: JoinHandle<()>) {
        self.inner.stopping.store(true, Ordering::Release);
        self.inner.notify_full.notify_one();
        let _ = handle.await;
        self.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingSink {
        rows: AtomicUsize,
        batches: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl LogSink for CountingSink {
        async fn write_batch(&self, entries: &[LogEntry]) -> Result<(), anyhow::Error> {
            self.rows.fetch_add(entries.len(), Ordering::SeqCst);
            self.batches.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn sample_entry(id: &str) -> LogEntry {
        LogEntry {
            request_id: id.to_string(),
            user_id: "u1".to_string(),
            group: "default".to_string(),
            token_id: 1,
            requested_model: "gpt-4o-mini".to_string(),
            actual_model: "gpt-4o-mini".to_string(),
            channel_id: 11,
            selection_reason: "Health-based".to_string(),
            prompt_tokens: 10,
            completion_tokens: 20,
            quota_used: 30,
            status_code: 200,
            latency_ms: 120,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn add_then_stop_flushes_all_entries_at_most_once() {
        let sink = Arc::new(CountingSink {
            rows: AtomicUsize::new(0),
            batches: AtomicUsize::new(0),
        });
        let batcher = Arc::new(AsyncLogBatcher::with_config(
            sink.clone(),
            1_000,
            Duration::from_secs(3600),
        ));
        let handle = batcher.spawn();

        for i in 0..10 {
            batcher.add(sample_entry(&i.to_string()));
        }

        batcher.stop(handle).await;
        assert_eq!(sink.rows.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn buffer_full_triggers_immediate_flush() {
        let sink = Arc::new(CountingSink {
            rows: AtomicUsize::new(0),
            batches: AtomicUsize::new(0),
        });
        let batcher = Arc::new(AsyncLogBatcher::with_config(
            sink.clone(),
            5,
            Duration::from_secs(3600),
        ));
        let handle = batcher.spawn();

        for i in 0..5 {
            batcher.add(sample_entry(&i.to_string()));
        }

        // Give the woken flusher a moment to run before we stop it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        batcher.stop(handle).await;
        assert_eq!(sink.rows.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn chunks_large_batches_at_100_rows() {
        let sink = Arc::new(CountingSink {
            rows: AtomicUsize::new(0),
            batches: AtomicUsize::new(0),
        });
        let batcher = Arc::new(AsyncLogBatcher::with_config(
            sink.clone(),
            1_000,
            Duration::from_secs(3600),
        ));
        let handle = batcher.spawn();

        for i in 0..250 {
            batcher.add(sample_entry(&i.to_string()));
        }
        batcher.stop(handle).await;

        assert_eq!(sink.rows.load(Ordering::SeqCst), 250);
        assert_eq!(sink.batches.load(Ordering::SeqCst), 3);
    }
}

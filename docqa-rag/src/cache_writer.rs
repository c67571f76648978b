//! Background cache writes.
//!
//! Answers are written to the [`ResponseCache`] off the request path through a
//! bounded queue drained by a fixed pool of worker tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::ResponseCache;
use crate::document::QueryResult;

struct CacheWrite {
    key: String,
    result: QueryResult,
    generation: u64,
}

/// A bounded queue of cache writes consumed by worker tasks.
///
/// [`submit`](Self::submit) never waits: when the queue is full the write is
/// dropped and logged. [`shutdown`](Self::shutdown) stops accepting writes and
/// waits until the queued ones are stored.
///
/// # Example
///
/// ```rust,ignore
/// let writer = CacheWriter::spawn(cache.clone(), 2, 256);
/// writer.submit(key, result, cache.generation());
/// writer.shutdown().await;
/// ```
pub struct CacheWriter {
    sender: RwLock<Option<mpsc::Sender<CacheWrite>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    dropped: AtomicU64,
}

impl CacheWriter {
    /// Start `workers` tasks draining a queue of `capacity` writes.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(cache: Arc<ResponseCache>, workers: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<CacheWrite>(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(write) = next else { break };
                        cache.put(&write.key, &write.result, write.generation).await;
                        debug!(worker, key = %write.key, "cached response");
                    }
                })
            })
            .collect();

        Self {
            sender: RwLock::new(Some(sender)),
            workers: Mutex::new(handles),
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue a write of an answer computed during cache `generation`.
    /// Returns `false` if it was dropped.
    pub fn submit(&self, key: String, result: QueryResult, generation: u64) -> bool {
        let guard = self.sender.read().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = guard.as_ref() else {
            debug!(key = %key, "cache writer stopped, skipping write");
            return false;
        };
        match sender.try_send(CacheWrite { key, result, generation }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(write)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(key = %write.key, "cache write queue full, dropping write");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Number of writes dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop accepting writes and wait for the queued ones to finish.
    pub async fn shutdown(&self) {
        self.sender.write().unwrap_or_else(PoisonError::into_inner).take();
        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "cache worker ended abnormally");
            }
        }
    }
}

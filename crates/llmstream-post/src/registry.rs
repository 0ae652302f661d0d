use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use llmstream_harness::{AbortHandle, AbortSignal};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("a stream is already writing to post {post_id}")]
    AlreadyStreamingToPost { post_id: String },
}

struct Entry {
    generation: u64,
    handle: AbortHandle,
}

#[derive(Default)]
struct RegistryInner {
    streams: Mutex<HashMap<String, Entry>>,
    next_generation: AtomicU64,
}

impl RegistryInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Tracks which posts currently have a stream writing into them.
///
/// At most one stream per post; entries are removed when their
/// [`StreamGuard`] is released or dropped.
#[derive(Clone, Default)]
pub struct StreamRegistry {
    inner: Arc<RegistryInner>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `post_id` for a new stream and returns its guard.
    pub fn register(&self, post_id: &str) -> Result<StreamGuard, RegistryError> {
        let mut streams = self.inner.lock();
        if streams.contains_key(post_id) {
            return Err(RegistryError::AlreadyStreamingToPost {
                post_id: post_id.to_string(),
            });
        }
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let (handle, signal) = AbortHandle::new();
        streams.insert(
            post_id.to_string(),
            Entry {
                generation,
                handle: handle.clone(),
            },
        );
        debug!(post_id, "stream registered");
        Ok(StreamGuard {
            registry: Arc::clone(&self.inner),
            post_id: post_id.to_string(),
            generation,
            handle,
            signal,
            released: false,
        })
    }

    /// Signals the stream writing to `post_id`; returns whether one was running.
    pub fn cancel(&self, post_id: &str) -> bool {
        let streams = self.inner.lock();
        match streams.get(post_id) {
            Some(entry) => {
                entry.handle.abort();
                debug!(post_id, "stream cancellation requested");
                true
            }
            None => false,
        }
    }

    pub fn is_streaming(&self, post_id: &str) -> bool {
        self.inner.lock().contains_key(post_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ownership of one registry entry; removes it exactly once.
pub struct StreamGuard {
    registry: Arc<RegistryInner>,
    post_id: String,
    generation: u64,
    handle: AbortHandle,
    signal: AbortSignal,
    released: bool,
}

impl StreamGuard {
    pub fn post_id(&self) -> &str {
        &self.post_id
    }

    /// Cancellation handle for this stream.
    pub fn handle(&self) -> AbortHandle {
        self.handle.clone()
    }

    /// Cancellation signal observed by the consumer.
    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Removes the entry. Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut streams = self.registry.lock();
        if streams
            .get(&self.post_id)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            streams.remove(&self.post_id);
            debug!(post_id = %self.post_id, "stream released");
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.release();
    }
}

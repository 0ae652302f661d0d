use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::post::Post;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("post not found: {0}")]
    NotFound(String),
    #[error("failed to encode post field {field}: {source}")]
    Encode {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("post store backend error: {0}")]
    Backend(String),
}

/// Persistence seam for posts written by the stream consumer.
#[async_trait::async_trait]
pub trait PostStore: Send + Sync {
    async fn get(&self, post_id: &str) -> Result<Post, StoreError>;

    /// Writes the full post, replacing any stored version.
    async fn update(&self, post: &Post) -> Result<(), StoreError>;
}

/// Process-local store, used by the CLI and tests.
#[derive(Default)]
pub struct MemoryPostStore {
    posts: Mutex<HashMap<String, Post>>,
}

impl MemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, post: Post) {
        self.posts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(post.id.clone(), post);
    }

    pub fn snapshot(&self, post_id: &str) -> Option<Post> {
        self.posts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(post_id)
            .cloned()
    }
}

#[async_trait::async_trait]
impl PostStore for MemoryPostStore {
    async fn get(&self, post_id: &str) -> Result<Post, StoreError> {
        self.snapshot(post_id)
            .ok_or_else(|| StoreError::NotFound(post_id.to_string()))
    }

    async fn update(&self, post: &Post) -> Result<(), StoreError> {
        self.insert(post.clone());
        Ok(())
    }
}

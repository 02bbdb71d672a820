//! In-memory [`PostRepository`] for tests and embedding.
//!
//! Mirrors the SQLite merge rules: a re-saved URI keeps its original
//! `created_at` and takes every other field from the incoming post.
//! Individual URIs can be marked as failing, and the whole store can be
//! made unavailable, to exercise partial-failure paths.

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::models::Post;
use crate::traits::PostRepository;

#[derive(Default)]
struct Inner {
    posts: HashMap<String, Post>,
    metadata: HashMap<String, String>,
    failing_uris: HashSet<String>,
    unavailable: bool,
}

/// Thread-safe in-memory post store.
#[derive(Default)]
pub struct MemoryRepository {
    inner: RwLock<Inner>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, uri: &str) -> Option<Post> {
        self.inner.read().posts.get(uri).cloned()
    }

    /// All stored posts, oldest first.
    pub fn posts(&self) -> Vec<Post> {
        let mut posts: Vec<Post> = self.inner.read().posts.values().cloned().collect();
        posts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.uri.cmp(&b.uri)));
        posts
    }

    /// Make every write of `uri` fail.
    pub fn fail_on(&self, uri: &str) {
        self.inner.write().failing_uris.insert(uri.to_string());
    }

    /// Make every operation fail, as if the backing store were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.write().unavailable = unavailable;
    }
}

#[async_trait]
impl PostRepository for MemoryRepository {
    async fn existing_uris(&self, uris: &[String]) -> Result<HashSet<String>> {
        let inner = self.inner.read();
        if inner.unavailable {
            bail!("store unavailable");
        }
        Ok(uris
            .iter()
            .filter(|uri| inner.posts.contains_key(uri.as_str()))
            .cloned()
            .collect())
    }

    async fn upsert_post(&self, post: &Post) -> Result<DateTime<Utc>> {
        let mut inner = self.inner.write();
        if inner.unavailable {
            bail!("store unavailable");
        }
        if inner.failing_uris.contains(&post.uri) {
            bail!("write rejected for {}", post.uri);
        }
        let mut merged = post.clone();
        if let Some(existing) = inner.posts.get(&post.uri) {
            merged.created_at = existing.created_at;
        }
        let created_at = merged.created_at;
        inner.posts.insert(post.uri.clone(), merged);
        Ok(created_at)
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let inner = self.inner.read();
        if inner.unavailable {
            bail!("store unavailable");
        }
        Ok(inner.metadata.get(key).cloned())
    }

    async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.unavailable {
            bail!("store unavailable");
        }
        inner.metadata.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

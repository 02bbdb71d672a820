//! Extension seams for timeline sources and post storage.
//!
//! The streaming worker only talks to the outside world through these two
//! traits. Built-in implementations are [`FileSource`](crate::connector_file::FileSource),
//! [`SqliteRepository`](crate::sqlite_store::SqliteRepository) and
//! [`MemoryRepository`](crate::memory_store::MemoryRepository); anything
//! else (a live network client, a test double) plugs in the same way.
//!
//! ```text
//!   PostSource ──fetch_recent──▶ StreamService ──upsert──▶ PostRepository
//!                                     │                        ▲
//!                                     └──── cursor metadata ───┘
//! ```

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::dedup;
use crate::models::{Post, SaveResult};

// ═══════════════════════════════════════════════════════════════════════
// PostSource
// ═══════════════════════════════════════════════════════════════════════

/// A timeline that can be polled for recent posts.
///
/// # Example
///
/// ```rust
/// use anyhow::Result;
/// use async_trait::async_trait;
/// use chrono::{DateTime, Utc};
/// use timeline_harness::models::Post;
/// use timeline_harness::traits::PostSource;
///
/// struct EmptyTimeline;
///
/// #[async_trait]
/// impl PostSource for EmptyTimeline {
///     fn name(&self) -> &str { "empty" }
///
///     async fn fetch_recent(
///         &self,
///         _window_start: DateTime<Utc>,
///         _now: DateTime<Utc>,
///     ) -> Result<Vec<Post>> {
///         Ok(vec![])
///     }
/// }
/// ```
#[async_trait]
pub trait PostSource: Send + Sync {
    /// Short label used in log output.
    fn name(&self) -> &str;

    /// Establish a session with the upstream service.
    ///
    /// Called by [`StreamService::start`](crate::stream::StreamService::start)
    /// under a bounded retry. Sources without a login step keep the default.
    async fn authenticate(&self) -> Result<()> {
        Ok(())
    }

    /// Fetch one best-effort batch of posts created at or after `window_start`.
    ///
    /// `now` is the poll time. Posts stamped slightly after it (upstream
    /// clock skew) are still returned. An empty timeline is `Ok(vec![])`,
    /// never an error.
    async fn fetch_recent(&self, window_start: DateTime<Utc>, now: DateTime<Utc>)
        -> Result<Vec<Post>>;
}

// ═══════════════════════════════════════════════════════════════════════
// PostRepository
// ═══════════════════════════════════════════════════════════════════════

/// Idempotent post storage plus a small key/value metadata store.
#[async_trait]
pub trait PostRepository: Send + Sync {
    /// Return the subset of `uris` already stored, in one round trip.
    async fn existing_uris(&self, uris: &[String]) -> Result<HashSet<String>>;

    /// Insert `post`, or merge it into the stored row with the same `uri`.
    ///
    /// On conflict every column is overwritten except `created_at`.
    /// Returns the `created_at` the stored row holds after the write, which
    /// for an update is the original value rather than `post.created_at`.
    async fn upsert_post(&self, post: &Post) -> Result<DateTime<Utc>>;

    /// Save a batch, classifying each post as new or updated.
    ///
    /// A failed write for one post is logged and skipped. Failures that
    /// affect the whole batch (the existence check) are returned.
    async fn upsert(&self, posts: &[Post]) -> Result<SaveResult> {
        dedup::save_posts(self, posts).await
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<String>>;

    async fn set_metadata(&self, key: &str, value: &str) -> Result<()>;
}

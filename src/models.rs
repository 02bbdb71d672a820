//! Core data models used throughout Timeline Harness.
//!
//! A [`Post`] is one timeline item as fetched from the upstream source. Its
//! `uri` is the only dedup key, and `created_at` is authoritative from the
//! origin: once a post is stored, later re-fetches never change it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single timeline post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Origin URI, unique per post.
    pub uri: String,
    /// Content identifier of the current revision.
    pub cid: String,
    pub author_handle: String,
    /// Stable author identifier (survives handle changes).
    pub author_did: String,
    #[serde(default)]
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub repost_count: u64,
    #[serde(default)]
    pub reply_count: u64,
    /// Assigned locally when the post is fetched.
    #[serde(default = "Utc::now")]
    pub indexed_at: DateTime<Utc>,
}

/// Outcome of saving a batch of posts.
///
/// `total` is always `new + updated`. Posts whose individual write failed
/// are counted in `failed` and excluded from every other field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SaveResult {
    pub new: u64,
    pub updated: u64,
    pub total: u64,
    pub failed: u64,
    /// Newest `created_at` held in storage by the posts written in this
    /// batch. An update contributes the stored value, not the re-fetched one.
    pub latest_created_at: Option<DateTime<Utc>>,
}

impl SaveResult {
    /// Record one successfully written post and the `created_at` it was
    /// stored with.
    pub(crate) fn record(&mut self, is_new: bool, stored_created_at: DateTime<Utc>) {
        if is_new {
            self.new += 1;
        } else {
            self.updated += 1;
        }
        self.total += 1;
        if self
            .latest_created_at
            .map_or(true, |latest| stored_created_at > latest)
        {
            self.latest_created_at = Some(stored_created_at);
        }
    }
}

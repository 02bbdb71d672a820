//! Dedup-aware batch saving.
//!
//! Resolves which URIs are already stored with a single existence check,
//! then writes every post with an insert-or-merge. A URI counts as new the
//! first time it appears in a batch only if it was not stored beforehand;
//! every later occurrence (stored, or earlier in the same batch) counts as
//! an update. One failed write does not abort the batch.

use anyhow::Result;
use std::collections::HashSet;

use crate::models::{Post, SaveResult};
use crate::traits::PostRepository;

/// Save `posts` through `repo`, returning aggregate new/updated counts.
pub async fn save_posts<R>(repo: &R, posts: &[Post]) -> Result<SaveResult>
where
    R: PostRepository + ?Sized,
{
    let mut result = SaveResult::default();
    if posts.is_empty() {
        return Ok(result);
    }

    let uris: Vec<String> = posts
        .iter()
        .map(|p| p.uri.clone())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let existing = repo.existing_uris(&uris).await?;

    let mut seen: HashSet<&str> = HashSet::with_capacity(posts.len());
    let mut failures: Vec<(&str, anyhow::Error)> = Vec::new();

    for post in posts {
        match repo.upsert_post(post).await {
            Ok(stored_created_at) => {
                let is_new = !existing.contains(&post.uri) && seen.insert(post.uri.as_str());
                result.record(is_new, stored_created_at);
            }
            Err(e) => failures.push((post.uri.as_str(), e)),
        }
    }

    result.failed = failures.len() as u64;
    for (uri, e) in &failures {
        tracing::warn!(uri, error = %e, "skipping post that failed to save");
    }

    tracing::debug!(
        new = result.new,
        updated = result.updated,
        failed = result.failed,
        "saved batch"
    );

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryRepository;
    use chrono::{Duration, TimeZone, Utc};

    fn post(uri: &str, likes: u64) -> Post {
        let created = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
        Post {
            uri: uri.to_string(),
            cid: format!("cid-{}", likes),
            author_handle: "alice.bsky.social".to_string(),
            author_did: "did:plc:alice".to_string(),
            text: "hello".to_string(),
            created_at: created,
            like_count: likes,
            repost_count: 0,
            reply_count: 0,
            indexed_at: created,
        }
    }

    #[tokio::test]
    async fn empty_batch_is_all_zero() {
        let repo = MemoryRepository::new();
        let result = save_posts(&repo, &[]).await.unwrap();
        assert_eq!((result.new, result.updated, result.total), (0, 0, 0));
        assert_eq!(result.latest_created_at, None);
    }

    #[tokio::test]
    async fn second_save_is_an_update() {
        let repo = MemoryRepository::new();
        let a = post("at://a/1", 1);

        let first = save_posts(&repo, &[a.clone()]).await.unwrap();
        assert_eq!((first.new, first.updated, first.total), (1, 0, 1));

        let second = save_posts(&repo, &[a]).await.unwrap();
        assert_eq!((second.new, second.updated, second.total), (0, 1, 1));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_uri_within_batch_counts_once_as_new() {
        let repo = MemoryRepository::new();
        let a = post("at://a/1", 1);
        let b = post("at://b/1", 1);
        let a2 = post("at://a/1", 9);

        let result = save_posts(&repo, &[a, b, a2]).await.unwrap();
        assert_eq!((result.new, result.updated, result.total), (2, 1, 3));
        assert_eq!(repo.get("at://a/1").unwrap().like_count, 9);
    }

    #[tokio::test]
    async fn failed_item_is_skipped() {
        let repo = MemoryRepository::new();
        repo.fail_on("at://bad/1");

        let posts = vec![post("at://a/1", 1), post("at://bad/1", 1), post("at://c/1", 1)];
        let result = save_posts(&repo, &posts).await.unwrap();
        assert_eq!((result.new, result.updated, result.total), (2, 0, 2));
        assert_eq!(result.failed, 1);
        assert!(repo.get("at://bad/1").is_none());
        assert!(repo.get("at://c/1").is_some());
    }

    #[tokio::test]
    async fn existence_check_failure_propagates() {
        let repo = MemoryRepository::new();
        repo.set_unavailable(true);
        assert!(save_posts(&repo, &[post("at://a/1", 1)]).await.is_err());
    }

    #[tokio::test]
    async fn latest_created_at_ignores_failed_posts() {
        let repo = MemoryRepository::new();
        let ok = post("at://a/1", 1);
        let mut newer = post("at://bad/1", 1);
        newer.created_at = ok.created_at + Duration::minutes(5);
        repo.fail_on("at://bad/1");

        let result = save_posts(&repo, &[ok.clone(), newer]).await.unwrap();
        assert_eq!(result.latest_created_at, Some(ok.created_at));
    }

    #[tokio::test]
    async fn latest_created_at_uses_stored_value_on_update() {
        let repo = MemoryRepository::new();
        let original = post("at://a/1", 1);
        save_posts(&repo, &[original.clone()]).await.unwrap();

        let mut refetched = post("at://a/1", 2);
        refetched.created_at = original.created_at + Duration::seconds(30);
        let result = save_posts(&repo, &[refetched]).await.unwrap();

        assert_eq!(result.updated, 1);
        assert_eq!(result.latest_created_at, Some(original.created_at));
    }
}

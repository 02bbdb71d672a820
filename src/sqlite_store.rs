//! SQLite-backed [`PostRepository`].
//!
//! Posts are keyed by `uri`. Re-saving a post runs
//! `INSERT ... ON CONFLICT(uri) DO UPDATE`, which overwrites every column
//! except `created_at`. Besides the repository trait this type carries the
//! read and maintenance queries used by the CLI.

use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::models::Post;
use crate::traits::PostRepository;

/// SQLite caps bound parameters per statement; stay well under it.
const EXISTS_CHUNK: usize = 500;

#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect using `config` and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn get_post(&self, uri: &str) -> Result<Option<Post>> {
        let row = sqlx::query(
            "SELECT uri, cid, author_handle, author_did, text, created_at, like_count, repost_count, reply_count, indexed_at FROM posts WHERE uri = ?",
        )
        .bind(uri)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_post).transpose()
    }

    /// Posts created in `[start, end]`, oldest first.
    ///
    /// `author` keeps only handles containing it, ignoring case.
    pub async fn posts_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        author: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<Post>> {
        let rows = sqlx::query(
            r#"
            SELECT uri, cid, author_handle, author_did, text, created_at,
                   like_count, repost_count, reply_count, indexed_at
            FROM posts
            WHERE created_at BETWEEN ? AND ?
              AND (? IS NULL OR instr(lower(author_handle), lower(?)) > 0)
            ORDER BY created_at ASC, uri ASC
            LIMIT ?
            "#,
        )
        .bind(start.timestamp_millis())
        .bind(end.timestamp_millis())
        .bind(author)
        .bind(author)
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_post).collect()
    }

    pub async fn count_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM posts WHERE created_at BETWEEN ? AND ?")
                .bind(start.timestamp_millis())
                .bind(end.timestamp_millis())
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn count_posts(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Oldest and newest `created_at`, or `None` for an empty table.
    pub async fn created_span(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let row = sqlx::query("SELECT MIN(created_at) AS lo, MAX(created_at) AS hi FROM posts")
            .fetch_one(&self.pool)
            .await?;
        let lo: Option<i64> = row.try_get("lo")?;
        let hi: Option<i64> = row.try_get("hi")?;
        match (lo, hi) {
            (Some(lo), Some(hi)) => Ok(Some((from_millis(lo)?, from_millis(hi)?))),
            _ => Ok(None),
        }
    }

    /// Delete posts created before `before`. Returns the number removed.
    pub async fn prune_older_than(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM posts WHERE created_at < ?")
            .bind(before.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Rebuild the database file to release space freed by deletes.
    pub async fn vacuum(&self) -> Result<()> {
        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .context("VACUUM failed")?;
        // Fold the WAL back so the main file reflects the new size.
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PostRepository for SqliteRepository {
    async fn existing_uris(&self, uris: &[String]) -> Result<HashSet<String>> {
        let mut found = HashSet::new();
        for chunk in uris.chunks(EXISTS_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT uri FROM posts WHERE uri IN (");
            let mut separated = qb.separated(", ");
            for uri in chunk {
                separated.push_bind(uri);
            }
            separated.push_unseparated(")");

            let rows: Vec<String> = qb.build_query_scalar().fetch_all(&self.pool).await?;
            found.extend(rows);
        }
        Ok(found)
    }

    async fn upsert_post(&self, post: &Post) -> Result<DateTime<Utc>> {
        let stored: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO posts (uri, cid, author_handle, author_did, text, created_at, like_count, repost_count, reply_count, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(uri) DO UPDATE SET
                cid = excluded.cid,
                author_handle = excluded.author_handle,
                author_did = excluded.author_did,
                text = excluded.text,
                like_count = excluded.like_count,
                repost_count = excluded.repost_count,
                reply_count = excluded.reply_count,
                indexed_at = excluded.indexed_at
            RETURNING created_at
            "#,
        )
        .bind(&post.uri)
        .bind(&post.cid)
        .bind(&post.author_handle)
        .bind(&post.author_did)
        .bind(&post.text)
        .bind(post.created_at.timestamp_millis())
        .bind(count_to_i64(post.like_count))
        .bind(count_to_i64(post.repost_count))
        .bind(count_to_i64(post.reply_count))
        .bind(post.indexed_at.timestamp_millis())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("upsert failed for {}", post.uri))?;

        from_millis(stored)
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM metadata WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO metadata (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn count_to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).with_context(|| format!("timestamp out of range: {}", ms))
}

fn row_to_post(row: &SqliteRow) -> Result<Post> {
    let count = |col: &str| -> Result<u64> {
        let n: i64 = row.try_get(col)?;
        Ok(u64::try_from(n).unwrap_or(0))
    };

    Ok(Post {
        uri: row.try_get("uri")?,
        cid: row.try_get("cid")?,
        author_handle: row.try_get("author_handle")?,
        author_did: row.try_get("author_did")?,
        text: row.try_get("text")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        like_count: count("like_count")?,
        repost_count: count("repost_count")?,
        reply_count: count("reply_count")?,
        indexed_at: from_millis(row.try_get("indexed_at")?)?,
    })
}

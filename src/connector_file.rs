//! File-backed timeline source.
//!
//! Reads a timeline export on every poll: either a JSON array of posts or
//! JSON Lines with one post per line. Posts created before the window start
//! are dropped; there is no upper bound, so a post stamped a little after
//! the poll time is still returned. The newest `limit` are kept and
//! `indexed_at` is stamped with the fetch time. A missing file is an empty
//! timeline.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::config::SourceConfig;
use crate::models::Post;
use crate::traits::PostSource;

pub struct FileSource {
    path: PathBuf,
    limit: usize,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, limit: usize) -> Self {
        Self {
            path: path.into(),
            limit: limit.max(1),
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(&config.path, config.limit)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PostSource for FileSource {
    fn name(&self) -> &str {
        "file"
    }

    async fn authenticate(&self) -> Result<()> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.is_file() => Ok(()),
            Ok(_) => bail!("timeline source is not a file: {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let parent = self
                    .path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or(Path::new("."));
                if parent.is_dir() {
                    Ok(())
                } else {
                    bail!("timeline source directory does not exist: {}", parent.display())
                }
            }
            Err(e) => Err(e)
                .with_context(|| format!("cannot access timeline source {}", self.path.display())),
        }
    }

    async fn fetch_recent(
        &self,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Post>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "timeline file not present yet");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read {}", self.path.display()))
            }
        };

        let mut posts = parse_timeline(&content)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;

        posts.retain(|p| p.created_at >= window_start);
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        posts.truncate(self.limit);
        for post in &mut posts {
            post.indexed_at = now;
        }

        Ok(posts)
    }
}

/// Parse a JSON array or JSON Lines document into posts.
pub fn parse_timeline(content: &str) -> Result<Vec<Post>> {
    let trimmed = content.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str::<Post>(line).with_context(|| format!("line {}", i + 1))
        })
        .collect()
}

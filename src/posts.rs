//! Stored post listing and pruning.
//!
//! Backs `tlh posts` and `tlh prune`. Pruning is a maintenance operation;
//! the streaming worker never deletes posts. After a prune the file can be
//! compacted with VACUUM.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::config::Config;
use crate::sqlite_store::SqliteRepository;
use crate::stats::format_bytes;

/// Selection for `tlh posts`.
#[derive(Debug, Clone, Default)]
pub struct PostsQuery {
    /// First day to include (YYYY-MM-DD).
    pub since: Option<String>,
    /// Last day to include (YYYY-MM-DD).
    pub until: Option<String>,
    /// Relative start: this many days before now. Excludes `since`.
    pub days: Option<u32>,
    /// Case-insensitive substring of the author handle.
    pub author: Option<String>,
    pub limit: Option<i64>,
}

/// Print the posts selected by `query`, oldest first.
pub async fn run_posts(config: &Config, query: &PostsQuery) -> Result<()> {
    let (start, end) = resolve_range(
        query.since.as_deref(),
        query.until.as_deref(),
        query.days,
        Utc::now(),
    )?;

    let repo = SqliteRepository::open(config).await?;
    let posts = repo
        .posts_between(start, end, query.author.as_deref(), query.limit)
        .await?;
    repo.close().await;

    if posts.is_empty() {
        println!("No posts found.");
        return Ok(());
    }

    print!(
        "{} posts, {} to {}",
        posts.len(),
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d")
    );
    match query.author.as_deref() {
        Some(author) => println!(" (author contains '{}')", author),
        None => println!(),
    }
    println!();

    for post in &posts {
        println!(
            "{}  @{}  ♥{} ⟲{} ↩{}",
            post.created_at.format("%Y-%m-%d %H:%M"),
            post.author_handle,
            post.like_count,
            post.repost_count,
            post.reply_count
        );
        println!("    {}", post.uri);
        for line in post.text.lines() {
            println!("    {}", line);
        }
        println!();
    }

    Ok(())
}

/// Delete posts created before a cutoff, optionally reclaiming disk space.
///
/// The cutoff is the start of `before` (YYYY-MM-DD) or `older_than_days`
/// before now; exactly one must be given. VACUUM only runs when something
/// was deleted.
pub async fn run_prune(
    config: &Config,
    before: Option<&str>,
    older_than_days: Option<u32>,
    vacuum: bool,
) -> Result<()> {
    let cutoff = prune_cutoff(before, older_than_days, Utc::now())?;

    let repo = SqliteRepository::open(config).await?;
    let removed = repo.prune_older_than(cutoff).await?;
    let remaining = repo.count_posts().await?;
    let vacuumed = vacuum && removed > 0;
    if vacuumed {
        repo.vacuum().await?;
    }
    repo.close().await;

    let size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);
    tracing::info!(removed, remaining, vacuumed, cutoff = %cutoff, "pruned posts");

    println!(
        "pruned {} posts created before {}",
        removed,
        cutoff.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("  Remaining:   {}", remaining);
    println!("  Size:        {}", format_bytes(size));
    println!("  Vacuum:      {}", if vacuumed { "yes" } else { "no" });
    Ok(())
}

/// Turn the `posts` date options into an inclusive `[start, end]` range.
fn resolve_range(
    since: Option<&str>,
    until: Option<&str>,
    days: Option<u32>,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = match (since, days) {
        (Some(_), Some(_)) => bail!("--since and --days cannot be combined"),
        (Some(s), None) => day_start(s)?,
        (None, Some(0)) => bail!("--days must be at least 1"),
        (None, Some(d)) => now - Duration::days(i64::from(d)),
        (None, None) => DateTime::<Utc>::UNIX_EPOCH,
    };
    let end = match until {
        Some(s) => day_end(s)?,
        None => now,
    };
    if end < start {
        bail!("the end of the range is earlier than its start");
    }
    Ok((start, end))
}

fn prune_cutoff(
    before: Option<&str>,
    older_than_days: Option<u32>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    match (before, older_than_days) {
        (Some(_), Some(_)) => bail!("--before and --older-than-days cannot be combined"),
        (Some(day), None) => day_start(day),
        (None, Some(0)) => bail!("--older-than-days must be at least 1"),
        (None, Some(d)) => Ok(now - Duration::days(i64::from(d))),
        (None, None) => bail!("a cutoff is required: --before or --older-than-days"),
    }
}

fn parse_day(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}', expected YYYY-MM-DD", s))
}

fn day_start(s: &str) -> Result<DateTime<Utc>> {
    let date = parse_day(s)?;
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .with_context(|| format!("invalid date '{}'", s))
}

fn day_end(s: &str) -> Result<DateTime<Utc>> {
    let date = parse_day(s)?;
    date.and_hms_milli_opt(23, 59, 59, 999)
        .map(|dt| dt.and_utc())
        .with_context(|| format!("invalid date '{}'", s))
}

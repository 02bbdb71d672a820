//! Database statistics and health overview.
//!
//! Provides a quick summary of what's stored: post counts, the span of
//! creation times, the persisted stream cursor and the database size. Used
//! by `tlh stats` to confirm the streaming worker is making progress.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use crate::config::Config;
use crate::cursor::CURSOR_KEY;
use crate::sqlite_store::SqliteRepository;
use crate::traits::PostRepository;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let repo = SqliteRepository::open(config).await?;

    let total_posts = repo.count_posts().await?;
    let now = Utc::now();
    let last_day = repo.count_between(now - Duration::days(1), now).await?;
    let span = repo.created_span().await?;
    let cursor = repo.get_metadata(CURSOR_KEY).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Timeline Harness: Database Stats");
    println!("=================================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Posts:       {}", total_posts);
    println!("  Last 24h:    {}", last_day);
    if let Some((oldest, newest)) = span {
        println!("  Oldest:      {}", format_ts(oldest));
        println!("  Newest:      {}", format_ts(newest));
    }

    let cursor_display = match cursor
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
    {
        Some(ts) => format_relative(ts.with_timezone(&Utc), now),
        None => "never".to_string(),
    };
    println!("  Last stream: {}", cursor_display);
    println!();

    repo.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
pub(crate) fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a timestamp relative to `now` (e.g. "3 hours ago").
fn format_relative(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - ts).num_seconds();

    if delta < 0 {
        return format_ts(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts(ts)
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn bytes_scale() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn relative_times() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        assert_eq!(format_relative(now, now), "just now");
        assert_eq!(format_relative(now - Duration::minutes(1), now), "1 min ago");
        assert_eq!(format_relative(now - Duration::hours(3), now), "3 hours ago");
        assert_eq!(format_relative(now - Duration::days(2), now), "2 days ago");
        assert_eq!(
            format_relative(now - Duration::days(60), now),
            "2024-11-11 12:00"
        );
    }
}

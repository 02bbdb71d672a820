//! `tlh stream`: run the polling worker until Ctrl-C.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::connector_file::FileSource;
use crate::filter::FilterConfig;
use crate::sqlite_store::SqliteRepository;
use crate::stream::{StatsSnapshot, StreamService};

/// Command-line overrides for the `[stream]` section.
#[derive(Debug, Default, Clone)]
pub struct StreamOverrides {
    pub user_handles: Vec<String>,
    pub keywords: Vec<String>,
    pub poll_interval_secs: Option<u64>,
    /// Log a stats snapshot this often while running.
    pub stats_every_secs: Option<u64>,
}

pub async fn run_stream(config: &Config, overrides: StreamOverrides) -> Result<()> {
    let mut settings = config.stream.to_settings();
    if !overrides.user_handles.is_empty() || !overrides.keywords.is_empty() {
        let users: Vec<&str> = if overrides.user_handles.is_empty() {
            config.stream.user_handles.iter().map(String::as_str).collect()
        } else {
            overrides.user_handles.iter().map(String::as_str).collect()
        };
        let keywords: Vec<&str> = if overrides.keywords.is_empty() {
            config.stream.keywords.iter().map(String::as_str).collect()
        } else {
            overrides.keywords.iter().map(String::as_str).collect()
        };
        settings = settings.with_filter(FilterConfig::new(users, keywords));
    }
    if let Some(secs) = overrides.poll_interval_secs {
        settings = settings.with_poll_interval(Duration::from_secs(secs));
    }

    let repo = Arc::new(SqliteRepository::open(config).await?);
    let source = Arc::new(FileSource::from_config(&config.source));
    tracing::info!(path = %source.path().display(), "reading timeline from file");

    let service = StreamService::new(source, repo.clone(), settings)?;
    service.start().await?;

    let stats_every = overrides
        .stats_every_secs
        .filter(|s| *s > 0)
        .map(Duration::from_secs);

    match stats_every {
        Some(every) => {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => {
                        res?;
                        break;
                    }
                    _ = ticker.tick() => log_snapshot(&service.stats()),
                }
            }
        }
        None => tokio::signal::ctrl_c().await?,
    }

    tracing::info!("received interrupt, stopping");
    service.stop().await;
    print_summary(&service.stats());

    repo.close().await;
    Ok(())
}

fn log_snapshot(stats: &StatsSnapshot) {
    tracing::info!(
        items_seen = stats.items_seen,
        items_saved = stats.items_saved,
        items_per_minute = stats.items_per_minute,
        error_streak = stats.error_streak,
        last_poll = ?stats.last_poll,
        "stream stats"
    );
}

fn print_summary(stats: &StatsSnapshot) {
    println!("stream session completed");
    println!("  runtime: {:.1} seconds", stats.runtime_seconds.unwrap_or(0.0));
    println!("  posts seen: {}", stats.items_seen);
    println!("  posts saved: {}", stats.items_saved);
    println!("  rate: {:.1} posts/minute", stats.items_per_minute);
    if let Some(ts) = stats.last_seen_at {
        println!("  cursor: {}", ts.to_rfc3339());
    }
}

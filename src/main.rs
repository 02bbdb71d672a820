//! # Timeline Harness CLI (`tlh`)
//!
//! ## Usage
//!
//! ```bash
//! tlh --config ./config/tlh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tlh init` | Create the SQLite database and run schema migrations |
//! | `tlh stream` | Poll the timeline continuously until Ctrl-C |
//! | `tlh stats` | Show stored post counts and the stream cursor |
//! | `tlh posts` | List stored posts by date range or author |
//! | `tlh prune` | Delete old posts, then VACUUM |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use timeline_harness::posts::PostsQuery;
use timeline_harness::stream_cmd::StreamOverrides;
use timeline_harness::{config, migrate, posts, stats, stream_cmd};

/// Timeline Harness CLI: continuous timeline ingestion into SQLite.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "tlh",
    about = "Timeline Harness: continuous timeline ingestion into SQLite",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tlh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file with the `posts` and `metadata`
    /// tables. Running it again is safe.
    Init,

    /// Stream the timeline into the database until interrupted.
    ///
    /// Polls the configured source every poll interval, keeps posts that
    /// pass the author/keyword filters and upserts them. Press Ctrl-C to stop.
    Stream {
        /// Only keep posts by this author handle (repeatable).
        #[arg(long = "user")]
        users: Vec<String>,

        /// Only keep posts containing this keyword (repeatable).
        #[arg(long = "keyword")]
        keywords: Vec<String>,

        /// Seconds between polls (overrides `stream.poll_interval_secs`).
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        poll_interval: Option<u64>,

        /// Log a statistics snapshot every N seconds.
        #[arg(long)]
        stats_every: Option<u64>,
    },

    /// Show database statistics.
    Stats,

    /// List stored posts, oldest first.
    Posts {
        /// Only posts created on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Only posts created on or before this date (YYYY-MM-DD).
        #[arg(long)]
        until: Option<String>,

        /// Only posts from the last N days.
        #[arg(long, conflicts_with = "since", value_parser = clap::value_parser!(u32).range(1..))]
        days: Option<u32>,

        /// Only posts whose author handle contains this text (case-insensitive).
        #[arg(long)]
        author: Option<String>,

        /// Maximum number of posts to print.
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Delete old posts and compact the database.
    Prune {
        /// Cutoff date (YYYY-MM-DD); posts created before it are removed.
        #[arg(long, required_unless_present = "older_than_days", conflicts_with = "older_than_days")]
        before: Option<String>,

        /// Remove posts created more than N days ago.
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        older_than_days: Option<u32>,

        /// Run VACUUM after deleting (default).
        #[arg(long, overrides_with = "no_vacuum")]
        vacuum: bool,

        /// Skip VACUUM after deleting.
        #[arg(long, overrides_with = "vacuum")]
        no_vacuum: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Stream {
            users,
            keywords,
            poll_interval,
            stats_every,
        } => {
            let overrides = StreamOverrides {
                user_handles: users,
                keywords,
                poll_interval_secs: poll_interval,
                stats_every_secs: stats_every,
            };
            stream_cmd::run_stream(&cfg, overrides).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Posts {
            since,
            until,
            days,
            author,
            limit,
        } => {
            let query = PostsQuery {
                since,
                until,
                days,
                author,
                limit,
            };
            posts::run_posts(&cfg, &query).await?;
        }
        Commands::Prune {
            before,
            older_than_days,
            vacuum: _,
            no_vacuum,
        } => {
            posts::run_prune(&cfg, before.as_deref(), older_than_days, !no_vacuum).await?;
        }
    }

    Ok(())
}

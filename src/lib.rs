//! # Timeline Harness
//!
//! Continuous ingestion of a social timeline into SQLite.
//!
//! A single background worker polls a timeline source, filters posts by
//! author and keyword, saves them with dedup-aware upserts, and tracks a
//! persisted cursor so restarts pick up where they left off. Fetch
//! failures back off exponentially; live statistics can be read at any
//! time while the worker runs.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────────┐   ┌──────────────┐
//! │ PostSource  │──▶│      StreamService       │──▶│PostRepository│
//! │ file / ...  │   │ filter → dedup → cursor  │   │ SQLite / mem │
//! └─────────────┘   │ backoff, stats, stop()   │   └──────────────┘
//!                   └──────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! tlh init                                  # create database
//! tlh stream --keyword rust --stats-every 60
//! tlh stats
//! tlh posts --since 2025-01-01
//! tlh prune --before 2024-12-01
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`traits`] | `PostSource` / `PostRepository` seams |
//! | [`filter`] | Author and keyword filters |
//! | [`dedup`] | Dedup-aware batch saving |
//! | [`backoff`] | Exponential backoff and bounded retry |
//! | [`cursor`] | Fetch window and persisted cursor |
//! | [`stream`] | Polling worker and statistics |
//! | [`sqlite_store`] | SQLite repository |
//! | [`memory_store`] | In-memory repository |
//! | [`connector_file`] | File-backed timeline source |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod backoff;
pub mod config;
pub mod connector_file;
pub mod cursor;
pub mod db;
pub mod dedup;
pub mod filter;
pub mod memory_store;
pub mod migrate;
pub mod models;
pub mod posts;
pub mod sqlite_store;
pub mod stats;
pub mod stream;
pub mod stream_cmd;
pub mod traits;

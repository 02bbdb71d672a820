//! Stream cursor: the newest post creation time seen so far.
//!
//! The cursor only decides how far back each poll looks. With no cursor
//! (cold start) the window is `2 × poll_interval`; once a cursor exists
//! it widens to `max(3 × poll_interval, min_lookback)` so that posts which
//! arrive late upstream are still picked up. Re-fetched posts are absorbed
//! by the idempotent upsert.
//!
//! The cursor is stored as RFC 3339 text under [`CURSOR_KEY`] and written
//! only when it moves forward. It is kept at millisecond precision, the
//! precision posts are stored with, so it never sits above the newest
//! stored `created_at`.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use std::time::Duration;

use crate::traits::PostRepository;

/// Metadata key holding the persisted cursor.
pub const CURSOR_KEY: &str = "last_stream_time";

/// Tunable lookback sizing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LookbackSettings {
    /// Poll intervals to look back on a cold start.
    pub cold_multiplier: u32,
    /// Poll intervals to look back once a cursor exists.
    pub warm_multiplier: u32,
    /// Lower bound on the warm lookback.
    pub min_lookback: Duration,
}

impl Default for LookbackSettings {
    fn default() -> Self {
        Self {
            cold_multiplier: 2,
            warm_multiplier: 3,
            min_lookback: Duration::from_secs(300),
        }
    }
}

impl LookbackSettings {
    /// Start of the fetch window for a poll at `now`.
    ///
    /// `last_seen_at` only selects cold vs warm sizing; the window is
    /// always anchored at `now`.
    pub fn window_start(
        &self,
        now: DateTime<Utc>,
        poll_interval: Duration,
        last_seen_at: Option<DateTime<Utc>>,
    ) -> DateTime<Utc> {
        let lookback = match last_seen_at {
            None => poll_interval.saturating_mul(self.cold_multiplier),
            Some(_) => poll_interval
                .saturating_mul(self.warm_multiplier)
                .max(self.min_lookback),
        };
        let lookback = chrono::Duration::from_std(lookback).unwrap_or(chrono::Duration::MAX);
        now.checked_sub_signed(lookback)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// In-memory cursor owned by the polling worker.
#[derive(Debug, Clone, Default)]
pub struct StreamCursor {
    last_seen_at: Option<DateTime<Utc>>,
    lookback: LookbackSettings,
}

impl StreamCursor {
    pub fn new(lookback: LookbackSettings) -> Self {
        Self {
            last_seen_at: None,
            lookback,
        }
    }

    pub fn with_last_seen(mut self, last_seen_at: Option<DateTime<Utc>>) -> Self {
        self.last_seen_at = last_seen_at;
        self
    }

    pub fn last_seen_at(&self) -> Option<DateTime<Utc>> {
        self.last_seen_at
    }

    pub fn is_cold(&self) -> bool {
        self.last_seen_at.is_none()
    }

    pub fn window_start(&self, now: DateTime<Utc>, poll_interval: Duration) -> DateTime<Utc> {
        self.lookback
            .window_start(now, poll_interval, self.last_seen_at)
    }

    /// Move the cursor to `observed` if it is newer. Returns whether it moved.
    pub fn advance(&mut self, observed: Option<DateTime<Utc>>) -> bool {
        match observed.map(|ts| ts.trunc_subsecs(3)) {
            Some(ts) if self.last_seen_at.map_or(true, |cur| ts > cur) => {
                self.last_seen_at = Some(ts);
                true
            }
            _ => false,
        }
    }

    /// Read the persisted cursor, if any.
    pub async fn load<R>(repo: &R) -> Result<Option<DateTime<Utc>>>
    where
        R: PostRepository + ?Sized,
    {
        let Some(raw) = repo.get_metadata(CURSOR_KEY).await? else {
            return Ok(None);
        };
        let ts = DateTime::parse_from_rfc3339(raw.trim())
            .with_context(|| format!("invalid {} value: {:?}", CURSOR_KEY, raw))?;
        Ok(Some(ts.with_timezone(&Utc)))
    }

    /// Write the current cursor. A cold cursor writes nothing.
    pub async fn persist<R>(&self, repo: &R) -> Result<()>
    where
        R: PostRepository + ?Sized,
    {
        if let Some(ts) = self.last_seen_at {
            repo.set_metadata(CURSOR_KEY, &ts.to_rfc3339_opts(SecondsFormat::Millis, true))
                .await?;
        }
        Ok(())
    }
}

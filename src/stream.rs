//! Continuous polling worker.
//!
//! [`StreamService`] owns one background task that repeatedly fetches the
//! recent timeline from a [`PostSource`], filters it, saves the survivors
//! through a [`PostRepository`], advances the cursor and sleeps until the
//! next poll. Fetch and whole-batch storage failures are retried forever
//! under exponential backoff; both the poll wait and the backoff wait end
//! as soon as [`stop`](StreamService::stop) is called.
//!
//! ```text
//!  Stopped ──start()──▶ Starting ──auth ok──▶ Running ──stop()──▶ Stopping ──▶ Stopped
//!                          │
//!                          └── auth failed ──▶ Stopped
//! ```
//!
//! Statistics are updated once per completed cycle under a single lock,
//! so [`stats`](StreamService::stats) never sees a half-applied cycle.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::{retry_with_backoff, sleep_or_cancel, Backoff, RetryError, RetryPolicy};
use crate::cursor::{LookbackSettings, StreamCursor};
use crate::filter::FilterConfig;
use crate::models::{Post, SaveResult};
use crate::traits::{PostRepository, PostSource};

/// Poll interval used when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Lifecycle state of a [`StreamService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Stopped => "stopped",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Errors returned by the service lifecycle.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("streaming service is already running")]
    AlreadyRunning,

    #[error("streaming service is {0}")]
    Busy(ServiceState),

    #[error("invalid stream settings: {0}")]
    InvalidConfig(String),

    #[error("setup failed after {attempts} attempt(s): {source}")]
    Setup {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("start was cancelled by stop()")]
    Cancelled,
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Wait between successful polls. `None` uses [`DEFAULT_POLL_INTERVAL`].
    pub poll_interval: Option<Duration>,
    pub filter: FilterConfig,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Fractional ± jitter applied to backoff delays.
    pub backoff_jitter: f64,
    /// Retry schedule for [`PostSource::authenticate`].
    pub auth_retry: RetryPolicy,
    /// How long [`StreamService::stop`] waits for the loop to exit.
    pub shutdown_timeout: Duration,
    pub lookback: LookbackSettings,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            poll_interval: None,
            filter: FilterConfig::default(),
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(300),
            backoff_jitter: 0.1,
            auth_retry: RetryPolicy::default(),
            shutdown_timeout: Duration::from_secs(5),
            lookback: LookbackSettings::default(),
        }
    }
}

impl StreamSettings {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_filter(mut self, filter: FilterConfig) -> Self {
        self.filter = filter;
        self
    }

    pub fn effective_poll_interval(&self) -> Duration {
        self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    fn validate(&self) -> Result<(), StreamError> {
        if self.effective_poll_interval().is_zero() {
            return Err(StreamError::InvalidConfig(
                "poll interval must be > 0".to_string(),
            ));
        }
        if self.base_backoff.is_zero() {
            return Err(StreamError::InvalidConfig(
                "base backoff must be > 0".to_string(),
            ));
        }
        if self.max_backoff < self.base_backoff {
            return Err(StreamError::InvalidConfig(
                "max backoff must be >= base backoff".to_string(),
            ));
        }
        if self.auth_retry.attempts == 0 {
            return Err(StreamError::InvalidConfig(
                "auth attempts must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Counters mutated only by the worker.
///
/// `session` identifies the `start()` that reset them. A worker left
/// running after a timed-out `stop()` carries an older session and its
/// updates are discarded.
#[derive(Debug, Clone, Default)]
struct StreamStats {
    session: u64,
    items_seen: u64,
    items_saved: u64,
    start_time: Option<DateTime<Utc>>,
    last_poll: Option<DateTime<Utc>>,
    error_streak: u32,
    last_seen_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of the service returned by [`StreamService::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub state: ServiceState,
    pub is_running: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub runtime_seconds: Option<f64>,
    pub items_seen: u64,
    pub items_saved: u64,
    pub items_per_minute: f64,
    pub last_poll: Option<DateTime<Utc>>,
    pub poll_interval_secs: f64,
    pub filters: FilterConfig,
    pub error_streak: u32,
    pub last_seen_at: Option<DateTime<Utc>>,
}

struct Shared {
    state: Mutex<ServiceState>,
    stats: Mutex<StreamStats>,
}

#[derive(Default)]
struct Control {
    /// Incremented by every `start()`.
    session: u64,
    token: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

/// Background timeline ingestion service.
pub struct StreamService {
    source: Arc<dyn PostSource>,
    repo: Arc<dyn PostRepository>,
    settings: StreamSettings,
    shared: Arc<Shared>,
    control: Mutex<Control>,
}

impl StreamService {
    pub fn new(
        source: Arc<dyn PostSource>,
        repo: Arc<dyn PostRepository>,
        settings: StreamSettings,
    ) -> Result<Self, StreamError> {
        settings.validate()?;
        Ok(Self {
            source,
            repo,
            settings,
            shared: Arc::new(Shared {
                state: Mutex::new(ServiceState::Stopped),
                stats: Mutex::new(StreamStats::default()),
            }),
            control: Mutex::new(Control::default()),
        })
    }

    pub fn state(&self) -> ServiceState {
        *self.shared.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }

    pub fn poll_interval(&self) -> Duration {
        self.settings.effective_poll_interval()
    }

    /// Authenticate, restore the cursor and launch the polling loop.
    ///
    /// Returns once the loop is running; it does not wait for any poll.
    pub async fn start(&self) -> Result<(), StreamError> {
        {
            let mut state = self.shared.state.lock();
            match *state {
                ServiceState::Stopped => *state = ServiceState::Starting,
                ServiceState::Running => {
                    warn!("streaming service is already running");
                    return Err(StreamError::AlreadyRunning);
                }
                other => return Err(StreamError::Busy(other)),
            }
        }

        let token = CancellationToken::new();
        let session = {
            let mut control = self.control.lock();
            control.session += 1;
            control.token = Some(token.clone());
            control.session
        };

        {
            let mut stats = self.shared.stats.lock();
            *stats = StreamStats {
                session,
                start_time: Some(Utc::now()),
                ..StreamStats::default()
            };
        }
        self.log_configuration();

        let source = Arc::clone(&self.source);
        let auth = retry_with_backoff(&self.settings.auth_retry, &token, "authenticate", || {
            let source = Arc::clone(&source);
            async move { source.authenticate().await }
        })
        .await;

        if let Err(e) = auth {
            self.abort_start(session);
            return Err(match e {
                RetryError::Exhausted { attempts, last } => {
                    error!(source = self.source.name(), attempts, error = %last, "authentication failed");
                    StreamError::Setup {
                        attempts,
                        source: last,
                    }
                }
                RetryError::Cancelled => StreamError::Cancelled,
            });
        }
        info!(source = self.source.name(), "authenticated");

        let last_seen_at = match StreamCursor::load(self.repo.as_ref()).await {
            Ok(ts) => ts,
            Err(e) => {
                warn!(error = %e, "could not load stream cursor; starting cold");
                None
            }
        };
        {
            let mut stats = self.shared.stats.lock();
            if stats.session == session {
                stats.last_seen_at = last_seen_at;
            }
        }

        let worker = Worker {
            source: Arc::clone(&self.source),
            repo: Arc::clone(&self.repo),
            filter: self.settings.filter.clone(),
            poll_interval: self.poll_interval(),
            backoff: Backoff::new(self.settings.base_backoff, self.settings.max_backoff)
                .with_jitter(self.settings.backoff_jitter),
            cursor: StreamCursor::new(self.settings.lookback).with_last_seen(last_seen_at),
            shared: Arc::clone(&self.shared),
            token: token.clone(),
            session,
        };

        {
            let control = self.control.lock();
            let mut state = self.shared.state.lock();
            if control.session != session
                || *state != ServiceState::Starting
                || token.is_cancelled()
            {
                drop(state);
                drop(control);
                self.abort_start(session);
                return Err(StreamError::Cancelled);
            }
            *state = ServiceState::Running;
        }

        let handle = tokio::spawn(worker.run());
        {
            let mut control = self.control.lock();
            if control.session == session {
                control.handle = Some(handle);
            }
        }
        info!(
            poll_interval_secs = self.poll_interval().as_secs_f64(),
            cursor = ?last_seen_at,
            "streaming service started"
        );
        Ok(())
    }

    /// Signal the loop to stop and wait up to the shutdown timeout for it.
    ///
    /// Always leaves the service `Stopped`. A cycle that is mid-fetch or
    /// mid-save finishes before the loop notices the signal; if that takes
    /// longer than the timeout the task is left to exit on its own.
    pub async fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            match *state {
                ServiceState::Stopped | ServiceState::Stopping => return,
                _ => *state = ServiceState::Stopping,
            }
        }
        info!("stopping streaming service");

        let (token, handle) = {
            let mut control = self.control.lock();
            (control.token.take(), control.handle.take())
        };
        if let Some(token) = token {
            token.cancel();
        }
        if let Some(handle) = handle {
            match tokio::time::timeout(self.settings.shutdown_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "polling task ended abnormally"),
                Err(_) => warn!(
                    timeout_secs = self.settings.shutdown_timeout.as_secs_f64(),
                    "polling task did not stop in time"
                ),
            }
        }

        *self.shared.state.lock() = ServiceState::Stopped;

        let stats = self.stats();
        info!(
            runtime_secs = stats.runtime_seconds.unwrap_or(0.0),
            items_seen = stats.items_seen,
            items_saved = stats.items_saved,
            items_per_minute = stats.items_per_minute,
            "streaming session completed"
        );
    }

    /// Consistent snapshot of the service statistics.
    pub fn stats(&self) -> StatsSnapshot {
        let state = self.state();
        let stats = self.shared.stats.lock().clone();
        let now = Utc::now();

        let runtime_seconds = stats
            .start_time
            .map(|start| (now - start).num_milliseconds().max(0) as f64 / 1000.0);
        let items_per_minute = match runtime_seconds {
            Some(secs) if secs > 0.0 => {
                ((stats.items_seen as f64 / secs) * 60.0 * 100.0).round() / 100.0
            }
            _ => 0.0,
        };

        StatsSnapshot {
            state,
            is_running: state == ServiceState::Running,
            start_time: stats.start_time,
            runtime_seconds,
            items_seen: stats.items_seen,
            items_saved: stats.items_saved,
            items_per_minute,
            last_poll: stats.last_poll,
            poll_interval_secs: self.poll_interval().as_secs_f64(),
            filters: self.settings.filter.clone(),
            error_streak: stats.error_streak,
            last_seen_at: stats.last_seen_at,
        }
    }

    /// Undo a failed `start()`, unless a later `start()` has taken over.
    fn abort_start(&self, session: u64) {
        let mut control = self.control.lock();
        if control.session != session {
            return;
        }
        control.token = None;
        *self.shared.state.lock() = ServiceState::Stopped;
    }

    fn log_configuration(&self) {
        let filter = &self.settings.filter;
        info!(
            source = self.source.name(),
            poll_interval_secs = self.poll_interval().as_secs_f64(),
            "starting streaming service"
        );
        if !filter.user_handles().is_empty() {
            info!(users = ?filter.user_handles(), "following specific users");
        }
        if !filter.keywords().is_empty() {
            info!(keywords = ?filter.keywords(), "filtering by keywords");
        }
        if filter.is_empty() {
            info!("processing all timeline posts (no filters)");
        }
    }
}

/// Result of one successful poll cycle.
#[derive(Debug, Clone, Copy)]
struct CycleOutcome {
    fetched: u64,
    matched: u64,
    saved: SaveResult,
}

/// State moved into the background task.
struct Worker {
    source: Arc<dyn PostSource>,
    repo: Arc<dyn PostRepository>,
    filter: FilterConfig,
    poll_interval: Duration,
    backoff: Backoff,
    cursor: StreamCursor,
    shared: Arc<Shared>,
    token: CancellationToken,
    session: u64,
}

impl Worker {
    /// Apply `f` to the stats if they still belong to this worker's session.
    fn update_stats(&self, f: impl FnOnce(&mut StreamStats)) {
        let mut stats = self.shared.stats.lock();
        if stats.session == self.session {
            f(&mut stats);
        }
    }

    async fn run(mut self) {
        info!(source = self.source.name(), "polling loop started");

        while !self.token.is_cancelled() {
            let wait = match self.poll_once().await {
                Ok(outcome) => {
                    self.backoff.on_success();
                    if outcome.saved.new > 0 {
                        info!(new = outcome.saved.new, "saved new posts");
                    }
                    debug!(
                        fetched = outcome.fetched,
                        matched = outcome.matched,
                        new = outcome.saved.new,
                        updated = outcome.saved.updated,
                        failed = outcome.saved.failed,
                        "poll cycle complete"
                    );
                    self.poll_interval
                }
                Err(e) => {
                    let delay = self.backoff.on_failure();
                    let streak = self.backoff.consecutive_errors();
                    self.update_stats(|stats| stats.error_streak = streak);
                    warn!(
                        error = %e,
                        error_streak = streak,
                        "poll failed; backing off {:.1}s",
                        delay.as_secs_f64()
                    );
                    delay
                }
            };

            if !sleep_or_cancel(&self.token, wait).await {
                break;
            }
        }

        info!("polling loop exited");
    }

    /// Fetch → filter → save → advance cursor. Stats change only on success.
    async fn poll_once(&mut self) -> anyhow::Result<CycleOutcome> {
        let now = Utc::now();
        let window_start = self.cursor.window_start(now, self.poll_interval);

        let posts = self.source.fetch_recent(window_start, now).await?;
        let fetched = posts.len() as u64;

        let matched: Vec<Post> = posts
            .into_iter()
            .filter(|p| self.filter.should_process(&p.author_handle, &p.text))
            .collect();

        let saved = self.repo.upsert(&matched).await?;

        if self.cursor.advance(saved.latest_created_at) {
            if let Err(e) = self.cursor.persist(self.repo.as_ref()).await {
                warn!(error = %e, "could not persist stream cursor");
            }
        }

        let last_seen_at = self.cursor.last_seen_at();
        self.update_stats(|stats| {
            stats.items_seen += fetched;
            stats.items_saved += saved.new;
            stats.last_poll = Some(now);
            stats.error_streak = 0;
            stats.last_seen_at = last_seen_at;
        });

        Ok(CycleOutcome {
            fetched,
            matched: matched.len() as u64,
            saved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryRepository;
    use anyhow::Result;
    use async_trait::async_trait;

    struct NoopSource;

    #[async_trait]
    impl PostSource for NoopSource {
        fn name(&self) -> &str {
            "noop"
        }

        async fn fetch_recent(&self, _: DateTime<Utc>, _: DateTime<Utc>) -> Result<Vec<Post>> {
            Ok(vec![])
        }
    }

    fn service(settings: StreamSettings) -> Result<StreamService, StreamError> {
        StreamService::new(
            Arc::new(NoopSource),
            Arc::new(MemoryRepository::new()),
            settings,
        )
    }

    #[test]
    fn default_poll_interval_applies() {
        let svc = service(StreamSettings::default()).unwrap();
        assert_eq!(svc.poll_interval(), DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let settings = StreamSettings::default().with_poll_interval(Duration::ZERO);
        assert!(matches!(
            service(settings),
            Err(StreamError::InvalidConfig(_))
        ));
    }

    #[test]
    fn inverted_backoff_bounds_are_rejected() {
        let settings = StreamSettings {
            base_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(1),
            ..StreamSettings::default()
        };
        assert!(matches!(
            service(settings),
            Err(StreamError::InvalidConfig(_))
        ));
    }

    #[test]
    fn fresh_service_stats_are_empty() {
        let svc = service(StreamSettings::default()).unwrap();
        let stats = svc.stats();
        assert_eq!(stats.state, ServiceState::Stopped);
        assert!(!stats.is_running);
        assert_eq!(stats.runtime_seconds, None);
        assert_eq!(stats.items_per_minute, 0.0);
        assert_eq!(stats.items_seen, 0);
    }

    #[tokio::test]
    async fn stop_on_stopped_service_is_noop() {
        let svc = service(StreamSettings::default()).unwrap();
        svc.stop().await;
        assert_eq!(svc.state(), ServiceState::Stopped);
    }

    #[test]
    fn state_display() {
        assert_eq!(ServiceState::Running.to_string(), "running");
        assert_eq!(
            StreamError::Busy(ServiceState::Stopping).to_string(),
            "streaming service is stopping"
        );
    }
}

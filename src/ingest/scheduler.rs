use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::worker::{run_feed, FeedOutcome};
use super::{FeedFetcher, FeedStore};

/// Default time between ingestion cycles
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Scheduler task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Lifecycle of the polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for the next tick; `completed` cycles have run so far
    Idle { completed: u64 },
    /// Cycle number `cycle` (1-based) is in progress
    Running { cycle: u64 },
    Stopped,
}

/// Totals for one ingestion cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Feeds listed at the start of the cycle
    pub feeds: usize,
    /// Feeds with polling disabled
    pub skipped: usize,
    pub succeeded: usize,
    /// Feeds that failed or panicked
    pub failed: usize,
    /// Articles stored across all feeds
    pub inserted: usize,
}

/// Run one ingestion cycle over a snapshot of the feed list.
///
/// Feeds are processed one after another. A failure in one feed, including a
/// panic, is logged and the cycle moves on. If the feed list cannot be read
/// the cycle ends empty.
pub async fn run_cycle(store: &dyn FeedStore, fetcher: &dyn FeedFetcher) -> CycleSummary {
    let started = Instant::now();
    let feeds = match store.list_feeds().await {
        Ok(feeds) => feeds,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to list feeds, skipping cycle");
            return CycleSummary::default();
        }
    };

    let mut summary = CycleSummary {
        feeds: feeds.len(),
        ..Default::default()
    };

    for feed in &feeds {
        if !feed.sync {
            tracing::debug!(feed_id = feed.id, "Polling disabled, skipping feed");
            summary.skipped += 1;
            continue;
        }
        match run_feed(store, fetcher, feed).await {
            FeedOutcome::Ingested(report) => {
                summary.succeeded += 1;
                summary.inserted += report.inserted;
            }
            FeedOutcome::Failed(_) | FeedOutcome::Panicked(_) => summary.failed += 1,
        }
    }

    tracing::info!(
        feeds = summary.feeds,
        skipped = summary.skipped,
        succeeded = summary.succeeded,
        failed = summary.failed,
        inserted = summary.inserted,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Ingestion cycle complete"
    );
    summary
}

/// Periodic ingestion of every subscribed feed.
pub struct Scheduler {
    store: Arc<dyn FeedStore>,
    fetcher: Arc<dyn FeedFetcher>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(store: Arc<dyn FeedStore>, fetcher: Arc<dyn FeedFetcher>, interval: Duration) -> Self {
        Self {
            store,
            fetcher,
            interval: interval.max(MIN_POLL_INTERVAL),
        }
    }

    /// Start the polling loop on the current runtime.
    ///
    /// The first cycle starts immediately, later ones on each interval tick.
    /// A tick that arrives while a cycle is still running is skipped.
    pub fn spawn(self) -> SchedulerHandle {
        let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle { completed: 0 });
        let Scheduler {
            store,
            fetcher,
            interval,
        } = self;

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut completed = 0u64;
            tracing::info!(interval_secs = interval.as_secs(), "Scheduler started");

            loop {
                tokio::select! {
                    biased;

                    _ = cancel_rx.recv() => {
                        tracing::info!(completed, "Scheduler shutdown requested");
                        break;
                    }
                    _ = ticker.tick() => {
                        state_tx.send_replace(SchedulerState::Running { cycle: completed + 1 });
                        run_cycle(store.as_ref(), fetcher.as_ref()).await;
                        completed += 1;
                        state_tx.send_replace(SchedulerState::Idle { completed });
                    }
                }
            }

            state_tx.send_replace(SchedulerState::Stopped);
        });

        SchedulerHandle {
            cancel_tx,
            join,
            state_rx,
        }
    }
}

/// Control handle for a spawned [`Scheduler`].
///
/// Dropping the handle also stops the loop after its current cycle.
pub struct SchedulerHandle {
    cancel_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
    state_rx: watch::Receiver<SchedulerState>,
}

impl SchedulerHandle {
    pub fn state(&self) -> SchedulerState {
        *self.state_rx.borrow()
    }

    /// A receiver that observes every state change.
    pub fn watch(&self) -> watch::Receiver<SchedulerState> {
        self.state_rx.clone()
    }

    /// Request a stop without waiting. An in-flight cycle runs to completion.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(());
    }

    /// Request a stop and wait for the loop to exit.
    pub async fn stop(self) -> Result<(), SchedulerError> {
        self.cancel();
        self.join.await.map_err(SchedulerError::from)
    }
}

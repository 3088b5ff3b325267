use super::context::{FailureKind, RunOutcome, RunSummary, Stage};
use super::job::JobRunner;
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manufactures the identifier of each run.
pub trait RunIdSource: Send + Sync {
    fn next_id(&self, triggered_at: DateTime<Utc>) -> String;
}

/// Epoch milliseconds of the trigger time, bumped when two runs land in the
/// same millisecond so ids stay unique and increasing.
#[derive(Default)]
pub struct MillisRunIds {
    last: AtomicI64,
}

impl RunIdSource for MillisRunIds {
    fn next_id(&self, triggered_at: DateTime<Utc>) -> String {
        let millis = triggered_at.timestamp_millis();
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(millis.max(last + 1))
            })
            .unwrap_or(millis);
        millis.max(previous + 1).to_string()
    }
}

/// Fires the job at a fixed cadence.
///
/// Each tick runs the job to completion before the next tick is considered,
/// so at most one run is ever in flight. Ticks that fall due while a run is
/// still going are skipped rather than queued. Nothing a run does can stop
/// the loop.
pub struct Scheduler {
    job: Arc<JobRunner>,
    every: Duration,
    run_on_start: bool,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn RunIdSource>,
    history: Option<Arc<dyn Storage>>,
}

impl Scheduler {
    pub fn new(job: Arc<JobRunner>, every: Duration) -> Self {
        Self {
            job,
            every,
            run_on_start: false,
            clock: Arc::new(SystemClock),
            ids: Arc::new(MillisRunIds::default()),
            history: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_run_ids(mut self, ids: Arc<dyn RunIdSource>) -> Self {
        self.ids = ids;
        self
    }

    /// Record every run summary in `storage`.
    pub fn with_history(mut self, storage: Arc<dyn Storage>) -> Self {
        self.history = Some(storage);
        self
    }

    pub fn run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    /// Tick until `shutdown` is cancelled. A run in progress is finished first.
    pub async fn run(&self, shutdown: CancellationToken) {
        let first = if self.run_on_start {
            Instant::now()
        } else {
            Instant::now() + self.every
        };
        let mut ticker = interval_at(first, self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            job = %self.job.name(),
            every = ?self.every,
            run_on_start = self.run_on_start,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let started = Instant::now();
                    self.fire().await;

                    let elapsed = started.elapsed();
                    if elapsed > self.every {
                        let skipped = elapsed.as_nanos() / self.every.as_nanos().max(1);
                        warn!(
                            job = %self.job.name(),
                            elapsed_ms = elapsed.as_millis() as u64,
                            skipped_ticks = skipped as u64,
                            "Run outlasted the schedule period, skipping missed ticks"
                        );
                    }
                }
            }
        }

        info!(job = %self.job.name(), "Scheduler stopped");
    }

    /// Execute one run now and report it.
    ///
    /// Errors and panics from the run are caught here and turned into a
    /// `FAILED` summary.
    pub async fn fire(&self) -> RunSummary {
        let triggered_at = self.clock.now();
        let run_id = self.ids.next_id(triggered_at);
        let mut ctx = self.job.context(run_id, triggered_at);

        info!(run_id = %ctx.run_id(), job = %self.job.name(), "Starting run");

        let result = AssertUnwindSafe(self.job.run(&mut ctx)).catch_unwind().await;
        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                ctx.fail(e.stage(), FailureKind::NonSkippable, e.to_string());
                RunOutcome::Failed
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "run panicked".to_string());
                ctx.fail(Stage::Job, FailureKind::NonSkippable, message);
                RunOutcome::Failed
            }
        };

        let summary = RunSummary::from_context(self.job.name(), &ctx, outcome, self.clock.now());
        log_summary(&summary);

        if let Some(history) = &self.history {
            if let Err(e) = history.record_run(&summary).await {
                warn!(run_id = %summary.run_id, error = %e, "Failed to record run history");
            }
        }

        summary
    }
}

fn log_summary(summary: &RunSummary) {
    let elapsed_ms = (summary.finished_at - summary.triggered_at).num_milliseconds();
    match &summary.failure {
        None => info!(
            run_id = %summary.run_id,
            job = %summary.job_name,
            outcome = %summary.outcome,
            read = summary.stats.read_count,
            filtered = summary.stats.filter_count,
            written = summary.stats.write_count,
            skip_count = summary.skip_count,
            skip_limit = summary.skip_limit,
            elapsed_ms,
            "Run finished"
        ),
        Some(failure) => error!(
            run_id = %summary.run_id,
            job = %summary.job_name,
            outcome = %summary.outcome,
            stage = %failure.stage,
            kind = %failure.kind,
            error = %failure.message,
            written = summary.stats.write_count,
            skip_count = summary.skip_count,
            skip_limit = summary.skip_limit,
            elapsed_ms,
            "Run failed"
        ),
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Step of the pipeline a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Open,
    Read,
    Write,
    Close,
    /// Anything that escaped the run itself
    Job,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Open => "open",
            Stage::Read => "read",
            Stage::Write => "write",
            Stage::Close => "close",
            Stage::Job => "job",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SkipLimitExceeded,
    NonSkippable,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::SkipLimitExceeded => f.write_str("skip_limit_exceeded"),
            FailureKind::NonSkippable => f.write_str("non_skippable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub stage: Stage,
    pub kind: FailureKind,
    pub message: String,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure ({}): {}", self.stage, self.kind, self.message)
    }
}

/// Counters of one run's step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStats {
    /// Records delivered by the reader, including dropped ones
    pub read_count: u64,
    pub filter_count: u64,
    pub write_count: u64,
    pub read_skip_count: u64,
    pub write_skip_count: u64,
    pub commit_count: u64,
    pub rollback_count: u64,
}

impl StepStats {
    /// True when the reader produced nothing at all, not even a fault.
    pub fn saw_no_input(&self) -> bool {
        self.read_count == 0 && self.read_skip_count == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipDecision {
    Within,
    Exceeded,
}

/// Mutable state of a single run.
///
/// Created fresh for every invocation so that skip accounting can never leak
/// from one run into another. Only the chunk engine mutates it.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: String,
    triggered_at: DateTime<Utc>,
    skip_limit: u32,
    skip_count: u32,
    stats: StepStats,
    failure: Option<RunFailure>,
}

impl RunContext {
    pub fn new(run_id: impl Into<String>, triggered_at: DateTime<Utc>, skip_limit: u32) -> Self {
        Self {
            run_id: run_id.into(),
            triggered_at,
            skip_limit,
            skip_count: 0,
            stats: StepStats::default(),
            failure: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn triggered_at(&self) -> DateTime<Utc> {
        self.triggered_at
    }

    pub fn skip_limit(&self) -> u32 {
        self.skip_limit
    }

    pub fn skip_count(&self) -> u32 {
        self.skip_count
    }

    pub fn stats(&self) -> &StepStats {
        &self.stats
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        self.failure.as_ref()
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    pub(crate) fn record_read(&mut self) {
        self.stats.read_count += 1;
    }

    pub(crate) fn record_filtered(&mut self) {
        self.stats.filter_count += 1;
    }

    pub(crate) fn record_commit(&mut self, written: usize) {
        self.stats.write_count += written as u64;
        self.stats.commit_count += 1;
    }

    /// Charge one unit for a record the reader could not decode.
    pub(crate) fn charge_read_fault(&mut self) -> SkipDecision {
        self.stats.read_skip_count += 1;
        self.charge(1)
    }

    /// Charge a whole failed chunk: one unit per event in it.
    pub(crate) fn charge_write_fault(&mut self, chunk_len: usize) -> SkipDecision {
        self.stats.write_skip_count += chunk_len as u64;
        self.stats.rollback_count += 1;
        self.charge(u32::try_from(chunk_len).unwrap_or(u32::MAX))
    }

    fn charge(&mut self, units: u32) -> SkipDecision {
        self.skip_count = self.skip_count.saturating_add(units);
        if self.skip_count > self.skip_limit {
            SkipDecision::Exceeded
        } else {
            SkipDecision::Within
        }
    }

    /// Mark the run failed. The first failure wins.
    pub(crate) fn fail(&mut self, stage: Stage, kind: FailureKind, message: impl Into<String>) {
        if self.failure.is_none() {
            self.failure = Some(RunFailure {
                stage,
                kind,
                message: message.into(),
            });
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunOutcome {
    /// All available data processed within the skip budget
    Completed,
    /// Skip budget exceeded, or an error that cannot be skipped
    Failed,
    /// Nothing was available to read
    Empty,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunOutcome::Completed => "COMPLETED",
            RunOutcome::Failed => "FAILED",
            RunOutcome::Empty => "EMPTY",
        };
        f.write_str(name)
    }
}

impl FromStr for RunOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COMPLETED" => Ok(RunOutcome::Completed),
            "FAILED" => Ok(RunOutcome::Failed),
            "EMPTY" => Ok(RunOutcome::Empty),
            other => Err(format!("unknown run outcome: {}", other)),
        }
    }
}

/// Record of a finished run, logged once and kept in run history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub job_name: String,
    pub outcome: RunOutcome,
    pub triggered_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub skip_count: u32,
    pub skip_limit: u32,
    pub stats: StepStats,
    pub failure: Option<RunFailure>,
}

impl RunSummary {
    pub fn from_context(
        job_name: &str,
        context: &RunContext,
        outcome: RunOutcome,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: context.run_id.clone(),
            job_name: job_name.to_string(),
            outcome,
            triggered_at: context.triggered_at,
            finished_at,
            skip_count: context.skip_count,
            skip_limit: context.skip_limit,
            stats: context.stats,
            failure: context.failure.clone(),
        }
    }
}

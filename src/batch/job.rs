use super::context::{RunContext, RunOutcome, Stage};
use super::engine::{ChunkEngine, ChunkStatus};
use super::writer::ChunkWriter;
use crate::config::Config;
use crate::source::reader::{EventReader, ReaderSettings, StreamReader};
use crate::stream::{PartitionLog, StreamError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

/// Errors that end a run outside the chunk engine.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to open stream reader: {0}")]
    Open(#[source] StreamError),

    #[error("failed to commit offsets on close: {0}")]
    Close(#[source] StreamError),
}

impl JobError {
    pub fn stage(&self) -> Stage {
        match self {
            JobError::Open(_) => Stage::Open,
            JobError::Close(_) => Stage::Close,
        }
    }
}

/// One end-to-end execution of the pipeline, from opening the reader to the
/// reader reporting no more data.
pub struct JobRunner {
    name: String,
    log: Arc<dyn PartitionLog>,
    reader_settings: ReaderSettings,
    writer: Arc<dyn ChunkWriter>,
    chunk_size: usize,
    skip_limit: u32,
}

impl JobRunner {
    pub fn new(
        name: impl Into<String>,
        log: Arc<dyn PartitionLog>,
        reader_settings: ReaderSettings,
        writer: Arc<dyn ChunkWriter>,
        chunk_size: usize,
        skip_limit: u32,
    ) -> Self {
        Self {
            name: name.into(),
            log,
            reader_settings,
            writer,
            chunk_size,
            skip_limit,
        }
    }

    pub fn from_config(
        config: &Config,
        log: Arc<dyn PartitionLog>,
        writer: Arc<dyn ChunkWriter>,
    ) -> Self {
        Self::new(
            config.job.name.clone(),
            log,
            ReaderSettings::from_config(&config.stream),
            writer,
            config.job.chunk_size,
            config.job.skip_limit,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fresh context for one invocation.
    pub fn context(&self, run_id: impl Into<String>, triggered_at: DateTime<Utc>) -> RunContext {
        RunContext::new(run_id, triggered_at, self.skip_limit)
    }

    /// Open the reader, drain it through the engine, and commit on close.
    ///
    /// The reader is closed (and its delivered offsets committed) even when
    /// the engine failed, so records already consumed are not read again.
    pub async fn run(&self, ctx: &mut RunContext) -> Result<RunOutcome, JobError> {
        let mut reader = StreamReader::open(self.log.clone(), self.reader_settings.clone())
            .await
            .map_err(JobError::Open)?;

        let outcome = self.drive(&mut reader, ctx).await;

        if let Err(e) = reader.close().await {
            error!(run_id = %ctx.run_id(), error = %e, "Failed to close stream reader");
            return Err(JobError::Close(e));
        }

        Ok(outcome)
    }

    /// Ask the engine for chunks until it reports done or failed.
    pub async fn drive(&self, reader: &mut dyn EventReader, ctx: &mut RunContext) -> RunOutcome {
        let mut engine = ChunkEngine::new(reader, self.writer.as_ref(), self.chunk_size);

        let status = loop {
            match engine.process_next_chunk(ctx).await {
                ChunkStatus::Continue => continue,
                status => break status,
            }
        };

        let outcome = if status == ChunkStatus::Failed || ctx.is_failed() {
            RunOutcome::Failed
        } else if ctx.stats().saw_no_input() {
            RunOutcome::Empty
        } else {
            RunOutcome::Completed
        };

        info!(
            run_id = %ctx.run_id(),
            outcome = %outcome,
            read = ctx.stats().read_count,
            written = ctx.stats().write_count,
            skip_count = ctx.skip_count(),
            "Job step finished"
        );

        outcome
    }
}

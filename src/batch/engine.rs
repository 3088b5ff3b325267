use super::context::{FailureKind, RunContext, SkipDecision, Stage};
use super::filter;
use super::writer::ChunkWriter;
use crate::source::event::AccessLogEvent;
use crate::source::reader::EventReader;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Accumulating events into the current chunk
    Filling,
    /// Writer persisting the current chunk
    Flushing,
    /// Input exhausted, finishing any partial chunk
    Draining,
    Done,
    Failed,
}

/// Result of one [`ChunkEngine::process_next_chunk`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Continue,
    Done,
    Failed,
}

/// Pulls items from a reader, filters them, and writes them chunk by chunk.
///
/// This is the only place that charges the run's skip budget. Chunks are
/// written strictly in the order their events were read.
pub struct ChunkEngine<'a> {
    reader: &'a mut dyn EventReader,
    writer: &'a dyn ChunkWriter,
    chunk_size: usize,
    state: EngineState,
    chunk: Vec<AccessLogEvent>,
    exhausted: bool,
}

impl<'a> ChunkEngine<'a> {
    pub fn new(
        reader: &'a mut dyn EventReader,
        writer: &'a dyn ChunkWriter,
        chunk_size: usize,
    ) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            reader,
            writer,
            chunk_size,
            state: EngineState::Filling,
            chunk: Vec::with_capacity(chunk_size),
            exhausted: false,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Advance until one chunk has been flushed or a terminal state is reached.
    pub async fn process_next_chunk(&mut self, ctx: &mut RunContext) -> ChunkStatus {
        loop {
            match self.state {
                EngineState::Filling => self.fill(ctx).await,
                EngineState::Flushing => {
                    self.flush(ctx).await;
                    return self.status();
                }
                EngineState::Draining => {
                    self.state = if self.chunk.is_empty() {
                        EngineState::Done
                    } else {
                        EngineState::Flushing
                    };
                }
                EngineState::Done | EngineState::Failed => return self.status(),
            }
        }
    }

    fn status(&self) -> ChunkStatus {
        match self.state {
            EngineState::Done => ChunkStatus::Done,
            EngineState::Failed => ChunkStatus::Failed,
            _ => ChunkStatus::Continue,
        }
    }

    async fn fill(&mut self, ctx: &mut RunContext) {
        match self.reader.next().await {
            Ok(None) => {
                debug!(run_id = %ctx.run_id(), pending = self.chunk.len(), "No more data within poll timeout");
                self.exhausted = true;
                self.state = EngineState::Draining;
            }
            Ok(Some(delivered)) => {
                ctx.record_read();
                match filter::apply(delivered.event) {
                    Some(event) => {
                        self.chunk.push(event);
                        if self.chunk.len() >= self.chunk_size {
                            self.state = EngineState::Flushing;
                        }
                    }
                    None => ctx.record_filtered(),
                }
            }
            Err(fault) if fault.is_skippable() => {
                let decision = ctx.charge_read_fault();
                warn!(
                    run_id = %ctx.run_id(),
                    skip_count = ctx.skip_count(),
                    skip_limit = ctx.skip_limit(),
                    error = %fault,
                    "Skipped unreadable record"
                );
                if decision == SkipDecision::Exceeded {
                    ctx.fail(Stage::Read, FailureKind::SkipLimitExceeded, fault.to_string());
                    self.fail();
                }
            }
            Err(fault) => {
                error!(run_id = %ctx.run_id(), error = %fault, "Stream read failed");
                ctx.fail(Stage::Read, FailureKind::NonSkippable, fault.to_string());
                self.fail();
            }
        }
    }

    async fn flush(&mut self, ctx: &mut RunContext) {
        let chunk = std::mem::take(&mut self.chunk);

        match self.writer.write(&chunk).await {
            Ok(()) => {
                ctx.record_commit(chunk.len());
                info!(
                    run_id = %ctx.run_id(),
                    chunk_len = chunk.len(),
                    write_count = ctx.stats().write_count,
                    "Committed chunk"
                );
            }
            Err(fault) => {
                let decision = ctx.charge_write_fault(chunk.len());
                warn!(
                    run_id = %ctx.run_id(),
                    chunk_len = chunk.len(),
                    skip_count = ctx.skip_count(),
                    skip_limit = ctx.skip_limit(),
                    error = %fault,
                    "Skipped chunk after write failure"
                );
                if decision == SkipDecision::Exceeded {
                    ctx.fail(Stage::Write, FailureKind::SkipLimitExceeded, fault.to_string());
                    self.fail();
                    return;
                }
            }
        }

        self.chunk.reserve(self.chunk_size);
        self.state = if self.exhausted {
            EngineState::Done
        } else {
            EngineState::Filling
        };
    }

    fn fail(&mut self) {
        self.chunk.clear();
        self.state = EngineState::Failed;
    }
}

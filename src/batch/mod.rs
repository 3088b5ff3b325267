//! Chunk-oriented batch processing of access-log events.
//!
//! A [`Scheduler`] fires a [`JobRunner`] on a fixed cadence. Each run drives a
//! [`ChunkEngine`] that reads from the stream, filters, and writes chunks
//! while charging faults against the run's skip budget.

pub mod context;
pub mod engine;
pub mod filter;
pub mod job;
pub mod scheduler;
pub mod writer;

pub use context::{RunContext, RunFailure, RunOutcome, RunSummary, StepStats};
pub use engine::{ChunkEngine, ChunkStatus};
pub use job::{JobError, JobRunner};
pub use scheduler::{Clock, MillisRunIds, RunIdSource, Scheduler, SystemClock};
pub use writer::{ChunkWriter, StoreWriter, WriteFault};

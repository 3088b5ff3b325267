//! The partitioned stream the pipeline consumes.
//!
//! Offsets belong to the stream, not to the pipeline: consumers commit their
//! positions per group here and a restarted consumer resumes from the last
//! commit. The pipeline keeps no checkpoint of its own.

pub mod client;
pub mod log;
pub mod memory;
pub mod protocol;
pub mod server;

pub use client::HttpLog;
pub use log::{Offsets, PartitionLog, RecordPosition, StreamError, StreamRecord};
pub use memory::MemoryLog;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Partition id -> next offset to read.
pub type Offsets = BTreeMap<u32, u64>;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("unknown partition {partition} for topic {topic}")]
    UnknownPartition { topic: String, partition: u32 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("broker returned error status {status}: {message}")]
    Broker { status: u16, message: String },

    #[error("no broker reachable: {0}")]
    Unreachable(String),
}

/// A record stored in one partition of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRecord {
    pub partition: u32,
    pub offset: u64,
    pub key: Option<String>,
    /// Raw JSON text as published; decoding is the consumer's job
    pub payload: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPosition {
    pub partition: u32,
    pub offset: u64,
}

/// A partitioned, append-only log with per-group committed offsets.
///
/// Committed offsets are the only consumer state that survives a run: a
/// reader that starts over resumes from whatever was last committed here.
#[async_trait]
pub trait PartitionLog: Send + Sync {
    /// Append a record. Keyed records always land on the same partition.
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: String,
    ) -> Result<RecordPosition, StreamError>;

    /// Read up to `limit` records from `partition` starting at `offset`.
    /// Reading at or past the end returns an empty list.
    async fn fetch(
        &self,
        topic: &str,
        partition: u32,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<StreamRecord>, StreamError>;

    /// Offset the next appended record will receive.
    async fn end_offset(&self, topic: &str, partition: u32) -> Result<u64, StreamError>;

    async fn committed(&self, group: &str, topic: &str) -> Result<Offsets, StreamError>;

    /// Record `offsets` for `group`. Offsets never move backwards; a lower
    /// value than the one already committed is ignored.
    async fn commit(&self, group: &str, topic: &str, offsets: &Offsets) -> Result<(), StreamError>;
}

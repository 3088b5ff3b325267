use crate::batch::context::RunSummary;
use crate::source::event::{AccessLogEvent, StoredAccessLog};
use async_trait::async_trait;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn init_schema(&self) -> Result<(), StorageError>;

    /// Insert `events` in one transaction. Either every row is stored or none is.
    async fn write_access_logs(&self, events: &[AccessLogEvent]) -> Result<usize, StorageError>;

    async fn count_access_logs(&self) -> Result<u64, StorageError>;

    /// Stored rows in insertion order
    async fn list_access_logs(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredAccessLog>, StorageError>;

    async fn record_run(&self, summary: &RunSummary) -> Result<(), StorageError>;

    /// Most recent runs first
    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>, StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("database is locked by another process (PID {0})")]
    Locked(u32),

    #[error("invalid statement: {0}")]
    Statement(String),

    #[error("no value bound for parameter :{0}")]
    UnboundParameter(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<duckdb::Error> for StorageError {
    fn from(e: duckdb::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

use crate::source::event::AccessLogEvent;
use crate::storage::{Storage, StorageError};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// A chunk that could not be stored. Nothing from it was persisted.
#[derive(Debug, Error)]
#[error("failed to write chunk of {len} events: {source}")]
pub struct WriteFault {
    pub len: usize,
    #[source]
    pub source: StorageError,
}

/// Stores one chunk atomically.
#[async_trait]
pub trait ChunkWriter: Send + Sync {
    async fn write(&self, chunk: &[AccessLogEvent]) -> Result<(), WriteFault>;
}

/// Writes chunks into the `access_log` table of a [`Storage`].
pub struct StoreWriter {
    storage: Arc<dyn Storage>,
}

impl StoreWriter {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ChunkWriter for StoreWriter {
    async fn write(&self, chunk: &[AccessLogEvent]) -> Result<(), WriteFault> {
        self.storage
            .write_access_logs(chunk)
            .await
            .map(|_| ())
            .map_err(|source| WriteFault {
                len: chunk.len(),
                source,
            })
    }
}

//! Request and response bodies of the stream HTTP protocol.

use super::log::{Offsets, StreamRecord};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishRequest {
    #[serde(default)]
    pub key: Option<String>,
    pub payload: String,
}

#[derive(Debug, Deserialize)]
pub struct FetchQuery {
    #[serde(default)]
    pub offset: u64,
    #[serde(default = "default_fetch_limit")]
    pub limit: usize,
}

fn default_fetch_limit() -> usize {
    500
}

/// Upper bound on records returned by one fetch
pub const MAX_FETCH_LIMIT: usize = 5000;

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordsResponse {
    pub records: Vec<StreamRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EndOffsetResponse {
    pub offset: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OffsetsBody {
    pub offsets: Offsets,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommitResponse {
    pub committed: usize,
}

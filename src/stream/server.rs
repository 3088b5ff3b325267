use super::log::{PartitionLog, RecordPosition, StreamError};
use super::protocol::{
    CommitResponse, EndOffsetResponse, FetchQuery, OffsetsBody, PublishRequest, RecordsResponse,
    MAX_FETCH_LIMIT,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

pub type BrokerState = Arc<dyn PartitionLog>;

/// Routes of the stream HTTP protocol, served under `/stream`.
pub fn router(log: BrokerState) -> Router {
    Router::new()
        .route("/stream/topics/:topic/records", post(publish))
        .route(
            "/stream/topics/:topic/partitions/:partition/records",
            get(fetch_records),
        )
        .route(
            "/stream/topics/:topic/partitions/:partition/end",
            get(end_offset),
        )
        .route(
            "/stream/groups/:group/topics/:topic/offsets",
            get(get_committed).post(commit_offsets),
        )
        .with_state(log)
}

/// POST /stream/topics/:topic/records
async fn publish(
    State(log): State<BrokerState>,
    Path(topic): Path<String>,
    Json(request): Json<PublishRequest>,
) -> Result<Json<RecordPosition>, BrokerError> {
    let position = log
        .publish(&topic, request.key.as_deref(), request.payload)
        .await?;
    Ok(Json(position))
}

/// GET /stream/topics/:topic/partitions/:partition/records?offset=N&limit=M
async fn fetch_records(
    State(log): State<BrokerState>,
    Path((topic, partition)): Path<(String, u32)>,
    Query(query): Query<FetchQuery>,
) -> Result<Json<RecordsResponse>, BrokerError> {
    let limit = query.limit.clamp(1, MAX_FETCH_LIMIT);
    let records = log.fetch(&topic, partition, query.offset, limit).await?;
    Ok(Json(RecordsResponse { records }))
}

/// GET /stream/topics/:topic/partitions/:partition/end
async fn end_offset(
    State(log): State<BrokerState>,
    Path((topic, partition)): Path<(String, u32)>,
) -> Result<Json<EndOffsetResponse>, BrokerError> {
    let offset = log.end_offset(&topic, partition).await?;
    Ok(Json(EndOffsetResponse { offset }))
}

/// GET /stream/groups/:group/topics/:topic/offsets
async fn get_committed(
    State(log): State<BrokerState>,
    Path((group, topic)): Path<(String, String)>,
) -> Result<Json<OffsetsBody>, BrokerError> {
    let offsets = log.committed(&group, &topic).await?;
    Ok(Json(OffsetsBody { offsets }))
}

/// POST /stream/groups/:group/topics/:topic/offsets
async fn commit_offsets(
    State(log): State<BrokerState>,
    Path((group, topic)): Path<(String, String)>,
    Json(body): Json<OffsetsBody>,
) -> Result<Json<CommitResponse>, BrokerError> {
    log.commit(&group, &topic, &body.offsets).await?;
    Ok(Json(CommitResponse {
        committed: body.offsets.len(),
    }))
}

#[derive(Debug)]
pub struct BrokerError(StreamError);

impl From<StreamError> for BrokerError {
    fn from(e: StreamError) -> Self {
        Self(e)
    }
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StreamError::UnknownTopic(_) | StreamError::UnknownPartition { .. } => {
                StatusCode::NOT_FOUND
            }
            StreamError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        };

        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

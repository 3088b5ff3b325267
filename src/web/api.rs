use crate::batch::filter::{filter_event, DropReason};
use crate::batch::RunSummary;
use crate::source::event::{AccessLogEvent, StoredAccessLog};
use crate::source::timestamp::optional_access_time;
use crate::storage::{Storage, StorageError};
use crate::stream::{PartitionLog, RecordPosition, StreamError};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared state for the API
#[derive(Clone)]
pub struct AppState {
    pub log: Arc<dyn PartitionLog>,
    pub storage: Arc<dyn Storage>,
    pub topic: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishLogRequest {
    pub user_id: String,
    pub ip_address: String,
    #[serde(default)]
    pub user_agent: String,
    pub request_url: String,
    pub method: String,
    #[serde(default, with = "optional_access_time")]
    pub access_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct PublishLogResponse {
    pub position: RecordPosition,
    pub event: AccessLogEvent,
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    #[serde(default = "default_runs_limit")]
    pub limit: usize,
}

fn default_runs_limit() -> usize {
    20
}

#[derive(Debug, Serialize)]
pub struct RunsResponse {
    pub runs: Vec<RunSummary>,
}

#[derive(Debug, Deserialize)]
pub struct AccessLogsQuery {
    #[serde(default = "default_logs_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_logs_limit() -> usize {
    100
}

#[derive(Debug, Serialize)]
pub struct AccessLogsResponse {
    pub logs: Vec<StoredAccessLog>,
    pub total: u64,
}

pub async fn health_check() -> &'static str {
    "OK"
}

/// POST /api/logs
///
/// Publishes one event to the stream, keyed by user id so that a user's
/// events stay in one partition.
pub async fn publish_log(
    State(state): State<AppState>,
    Json(request): Json<PublishLogRequest>,
) -> Result<(StatusCode, Json<PublishLogResponse>), ApiError> {
    let event = AccessLogEvent {
        user_id: request.user_id,
        ip_address: request.ip_address,
        user_agent: request.user_agent,
        request_url: request.request_url,
        method: request.method,
        access_time: request.access_time.unwrap_or_else(Utc::now),
    };

    let event = match filter_event(Some(event)) {
        Ok(event) => event,
        Err(DropReason::MissingField(name)) => {
            return Err(ApiError::BadRequest(format!("{} must not be blank", name)))
        }
        Err(DropReason::Null) => return Err(ApiError::BadRequest("empty event".to_string())),
    };

    let payload = event
        .to_payload()
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    let position = state
        .log
        .publish(&state.topic, Some(&event.user_id), payload)
        .await?;

    debug!(
        user_id = %event.user_id,
        partition = position.partition,
        offset = position.offset,
        "Published access log"
    );

    Ok((StatusCode::CREATED, Json(PublishLogResponse { position, event })))
}

/// GET /api/runs?limit=N
pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<RunsResponse>, ApiError> {
    let limit = query.limit.clamp(1, 500);
    let runs = state.storage.recent_runs(limit).await?;
    Ok(Json(RunsResponse { runs }))
}

/// GET /api/access-logs?limit=N&offset=M
pub async fn list_access_logs(
    State(state): State<AppState>,
    Query(query): Query<AccessLogsQuery>,
) -> Result<Json<AccessLogsResponse>, ApiError> {
    let limit = query.limit.clamp(1, 1000);
    let logs = state.storage.list_access_logs(limit, query.offset).await?;
    let total = state.storage.count_access_logs().await?;
    Ok(Json(AccessLogsResponse { logs, total }))
}

// Error handling
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    BadGateway(String),
    InternalError(String),
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        ApiError::InternalError(e.to_string())
    }
}

impl From<StreamError> for ApiError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::Http(_) | StreamError::Broker { .. } | StreamError::Unreachable(_) => {
                ApiError::BadGateway(e.to_string())
            }
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        if status.is_server_error() {
            warn!(status = %status, error = %message, "API request failed");
        }

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

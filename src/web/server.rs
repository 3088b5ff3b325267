use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use super::api::{health_check, list_access_logs, list_runs, publish_log, AppState};
use crate::stream::{server as broker, PartitionLog};

/// Build the HTTP application.
///
/// `broker` additionally serves the stream protocol under `/stream`, which is
/// how remote producers and consumers reach an embedded log.
pub fn build_app(state: AppState, broker: Option<Arc<dyn PartitionLog>>) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/api/logs", post(publish_log))
        .route("/api/runs", get(list_runs))
        .route("/api/access-logs", get(list_access_logs))
        .with_state(state);

    let app = match broker {
        Some(log) => api_routes.merge(broker::router(log)),
        None => api_routes,
    };

    app.layer(TraceLayer::new_for_http())
}

/// Serve `app` on `listen` until `shutdown` is cancelled
pub async fn run_server(
    app: Router,
    listen: &str,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!("Web server listening on {}", listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::info!("Web server shutting down gracefully");
        })
        .await
}

use crate::batch::{JobRunner, RunOutcome, Scheduler, StoreWriter};
use crate::config::parse::{load_config, ConfigError};
use crate::config::{default_config_paths, Config, StartPosition};
use crate::storage::{DuckDbStorage, Storage, StorageError};
use crate::stream::{server as broker_server, HttpLog, MemoryLog, PartitionLog, StreamError};
use crate::web::{build_app, run_server, AppState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("web server error: {0}")]
    WebServer(#[from] std::io::Error),
}

/// The partition log the job reads from, and the same log when it is
/// embedded and must be served to producers over HTTP.
struct StreamHandles {
    log: Arc<dyn PartitionLog>,
    embedded: Option<Arc<dyn PartitionLog>>,
}

fn open_stream(config: &Config) -> Result<StreamHandles, StreamError> {
    let stream = &config.stream;
    if stream.uses_embedded_broker() {
        info!(
            topic = %stream.topic,
            partitions = stream.embedded_partitions,
            "Using embedded stream broker"
        );
        if stream.start_position == StartPosition::Latest {
            info!("Embedded broker starts empty, reading it from the earliest offset");
        }
        let log: Arc<dyn PartitionLog> =
            Arc::new(MemoryLog::with_topic(&stream.topic, stream.embedded_partitions)?);
        Ok(StreamHandles {
            log: log.clone(),
            embedded: Some(log),
        })
    } else {
        info!(brokers = ?stream.brokers, "Using remote stream brokers");
        Ok(StreamHandles {
            log: Arc::new(HttpLog::new(&stream.brokers, stream.request_timeout)?),
            embedded: None,
        })
    }
}

async fn open_storage(config: &Config) -> Result<Arc<DuckDbStorage>, StorageError> {
    info!(path = %config.storage.path.display(), "Initializing storage");
    let storage = Arc::new(DuckDbStorage::new(&config.storage.path)?);
    storage.init_schema().await?;
    Ok(storage)
}

fn require_config_path(config_path: Option<PathBuf>) -> PathBuf {
    match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            for path in default_config_paths() {
                eprintln!("  {}", path.display());
            }
            eprintln!("\nUse --config <path> to specify a config file, or run 'logbatch config init' to generate one.");
            std::process::exit(1);
        }
    }
}

fn load(config_path: &Path) -> Result<Config, ConfigError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    load_config(config_path)
}

/// Web server plus scheduler, until Ctrl+C
pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = require_config_path(config_path);
    run_service(&config_path).await.map_err(|e| e.into())
}

async fn run_service(config_path: &Path) -> Result<(), RunError> {
    let config = load(config_path)?;
    let storage = open_storage(&config).await?;
    let stream = open_stream(&config)?;

    if stream.embedded.is_some() && !config.web.enabled {
        warn!("Embedded broker without the web server: nothing can publish to the stream");
    }

    let writer = Arc::new(StoreWriter::new(storage.clone()));
    let job = Arc::new(JobRunner::from_config(&config, stream.log.clone(), writer));
    let scheduler = Scheduler::new(job, config.schedule.every)
        .run_on_start(config.schedule.run_on_start)
        .with_history(storage.clone());

    let shutdown = CancellationToken::new();

    let scheduler_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { scheduler.run(shutdown).await })
    };

    let web_handle = if config.web.enabled {
        let state = AppState {
            log: stream.log.clone(),
            storage: storage.clone(),
            topic: config.stream.topic.clone(),
        };
        let app = build_app(state, stream.embedded.clone());
        let listen = config.web.listen.clone();
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            let result = run_server(app, &listen, shutdown.clone()).await;
            // A server that cannot run takes the scheduler down with it
            if result.is_err() {
                shutdown.cancel();
            }
            result
        }))
    } else {
        None
    };

    info!("Pipeline started, press Ctrl+C to shutdown");

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();

    scheduler_handle.await?;
    if let Some(handle) = web_handle {
        if let Err(e) = handle.await? {
            error!(error = %e, "Web server failed");
            return Err(e.into());
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Execute a single run immediately and report its outcome.
pub async fn once(config_path: Option<PathBuf>) -> Result<RunOutcome, Box<dyn std::error::Error>> {
    let config_path = require_config_path(config_path);
    run_once(&config_path).await.map_err(|e| e.into())
}

async fn run_once(config_path: &Path) -> Result<RunOutcome, RunError> {
    let config = load(config_path)?;
    let storage = open_storage(&config).await?;
    let stream = open_stream(&config)?;

    if stream.embedded.is_some() {
        warn!("Single run against a fresh embedded broker; configure stream.brokers to drain a running broker");
    }

    let writer = Arc::new(StoreWriter::new(storage.clone()));
    let job = Arc::new(JobRunner::from_config(&config, stream.log, writer));
    let summary = Scheduler::new(job, config.schedule.every)
        .with_history(storage)
        .fire()
        .await;

    Ok(summary.outcome)
}

/// Serve only the stream protocol, backed by an in-memory log.
pub async fn broker(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = require_config_path(config_path);
    run_broker(&config_path).await.map_err(|e| e.into())
}

async fn run_broker(config_path: &Path) -> Result<(), RunError> {
    let config = load(config_path)?;
    let log = Arc::new(MemoryLog::with_topic(
        &config.stream.topic,
        config.stream.embedded_partitions,
    )?);
    info!(
        topic = %config.stream.topic,
        partitions = config.stream.embedded_partitions,
        "Starting stream broker"
    );

    let app = broker_server::router(log).layer(TraceLayer::new_for_http());
    let shutdown = CancellationToken::new();
    let server = {
        let shutdown = shutdown.clone();
        let listen = config.web.listen.clone();
        tokio::spawn(async move {
            let result = run_server(app, &listen, shutdown.clone()).await;
            if result.is_err() {
                shutdown.cancel();
            }
            result
        })
    };

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();

    server.await??;
    Ok(())
}

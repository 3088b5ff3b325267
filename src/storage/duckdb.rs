use super::named::{FieldValue, NamedStatement};
use super::traits::{Storage, StorageError};
use crate::batch::context::{RunFailure, RunOutcome, RunSummary, StepStats};
use crate::source::event::{AccessLogEvent, StoredAccessLog};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Insert statement for one access log row, bound by field name.
///
/// Timestamps are stored as UTC `TIMESTAMP` values built from epoch
/// microseconds so they read back without rounding.
pub const INSERT_ACCESS_LOG: &str = "INSERT INTO access_log \
     (access_time, ip_address, method, request_url, user_agent, user_id) \
     VALUES (make_timestamp(CAST(:accessTime AS BIGINT)), :ipAddress, :method, :requestUrl, :userAgent, :userId)";

/// Extract PID from DuckDB lock error message
fn extract_pid_from_lock_error(error_msg: &str) -> Option<u32> {
    // Error format: "... (PID 12345) ..."
    let start = error_msg.find("(PID ")? + 5;
    let end = error_msg[start..].find(')')?;
    error_msg[start..start + end].trim().parse().ok()
}

fn to_sql_value(value: FieldValue) -> duckdb::types::Value {
    match value {
        FieldValue::Text(s) => duckdb::types::Value::Text(s),
        FieldValue::TimestampMicros(us) => duckdb::types::Value::BigInt(us),
    }
}

fn from_micros(column: &str, micros: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        StorageError::Database(format!("invalid timestamp in column {}: {}", column, micros))
    })
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StorageError> {
    conn.lock()
        .map_err(|_| StorageError::Database("connection mutex poisoned".to_string()))
}

fn join_error(e: tokio::task::JoinError) -> StorageError {
    StorageError::Database(format!("Task join error: {}", e))
}

/// DuckDB implementation of the Storage trait.
///
/// One connection is shared by every chunk and every run; each chunk write is
/// its own transaction.
pub struct DuckDbStorage {
    conn: Arc<Mutex<Connection>>,
    insert_access_log: NamedStatement,
}

impl DuckDbStorage {
    /// Open (or create) a database file
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        match Connection::open(path) {
            Ok(conn) => Self::from_connection(conn),
            Err(e) => {
                let error_msg = e.to_string();
                if error_msg.contains("Could not set lock") {
                    if let Some(pid) = extract_pid_from_lock_error(&error_msg) {
                        tracing::error!(path = %path.display(), pid, "Database is locked by another process");
                        return Err(StorageError::Locked(pid));
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Create an in-memory DuckDB storage instance (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            insert_access_log: NamedStatement::parse(INSERT_ACCESS_LOG)?,
        })
    }
}

#[async_trait]
impl Storage for DuckDbStorage {
    async fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;

            conn.execute_batch(
                "CREATE SEQUENCE IF NOT EXISTS access_log_id_seq START 1;

                CREATE TABLE IF NOT EXISTS access_log (
                    id BIGINT PRIMARY KEY DEFAULT nextval('access_log_id_seq'),
                    access_time TIMESTAMP NOT NULL,
                    ip_address VARCHAR NOT NULL,
                    method VARCHAR NOT NULL CHECK (method <> ''),
                    request_url VARCHAR NOT NULL,
                    user_agent TEXT,
                    user_id VARCHAR NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_access_log_time ON access_log(access_time);

                CREATE TABLE IF NOT EXISTS job_runs (
                    run_id VARCHAR PRIMARY KEY,
                    job_name VARCHAR NOT NULL,
                    outcome VARCHAR NOT NULL,
                    triggered_at TIMESTAMP NOT NULL,
                    finished_at TIMESTAMP NOT NULL,
                    skip_count UINTEGER NOT NULL,
                    skip_limit UINTEGER NOT NULL,
                    stats VARCHAR NOT NULL,
                    failure VARCHAR
                );",
            )?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    async fn write_access_logs(&self, events: &[AccessLogEvent]) -> Result<usize, StorageError> {
        if events.is_empty() {
            return Ok(0);
        }

        let conn = self.conn.clone();
        let statement = self.insert_access_log.clone();
        let events = events.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;

            // Dropping the transaction without commit rolls it back
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(statement.sql())?;
                for event in &events {
                    let values = statement.bind(event)?;
                    stmt.execute(duckdb::params_from_iter(
                        values.into_iter().map(to_sql_value),
                    ))?;
                }
            }
            tx.commit()?;

            Ok::<_, StorageError>(events.len())
        })
        .await
        .map_err(join_error)?
    }

    async fn count_access_logs(&self) -> Result<u64, StorageError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM access_log", [], |row| row.get(0))?;
            Ok::<_, StorageError>(count.max(0) as u64)
        })
        .await
        .map_err(join_error)?
    }

    async fn list_access_logs(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredAccessLog>, StorageError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT id, epoch_us(access_time), ip_address, method, request_url, user_agent, user_id
                 FROM access_log
                 ORDER BY id
                 LIMIT ? OFFSET ?",
            )?;

            let rows = stmt.query_map(duckdb::params![limit as i64, offset as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?;

            let mut logs = Vec::new();
            for row in rows {
                let (id, access_us, ip_address, method, request_url, user_agent, user_id) = row?;
                logs.push(StoredAccessLog {
                    id,
                    event: AccessLogEvent {
                        user_id,
                        ip_address,
                        user_agent: user_agent.unwrap_or_default(),
                        request_url,
                        method,
                        access_time: from_micros("access_time", access_us)?,
                    },
                });
            }
            Ok::<_, StorageError>(logs)
        })
        .await
        .map_err(join_error)?
    }

    async fn record_run(&self, summary: &RunSummary) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let summary = summary.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let stats = serde_json::to_string(&summary.stats)?;
            let failure = summary
                .failure
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;

            conn.execute(
                "INSERT OR REPLACE INTO job_runs
                 (run_id, job_name, outcome, triggered_at, finished_at, skip_count, skip_limit, stats, failure)
                 VALUES (?, ?, ?, make_timestamp(CAST(? AS BIGINT)), make_timestamp(CAST(? AS BIGINT)), ?, ?, ?, ?)",
                duckdb::params![
                    summary.run_id,
                    summary.job_name,
                    summary.outcome.to_string(),
                    summary.triggered_at.timestamp_micros(),
                    summary.finished_at.timestamp_micros(),
                    summary.skip_count,
                    summary.skip_limit,
                    stats,
                    failure,
                ],
            )?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>, StorageError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(
                "SELECT run_id, job_name, outcome, epoch_us(triggered_at), epoch_us(finished_at),
                        skip_count, skip_limit, stats, failure
                 FROM job_runs
                 ORDER BY triggered_at DESC, run_id DESC
                 LIMIT ?",
            )?;

            let rows = stmt.query_map(duckdb::params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, u32>(5)?,
                    row.get::<_, u32>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, Option<String>>(8)?,
                ))
            })?;

            let mut runs = Vec::new();
            for row in rows {
                let (run_id, job_name, outcome, triggered_us, finished_us, skip_count, skip_limit, stats, failure) =
                    row?;

                let outcome: RunOutcome = outcome.parse().map_err(StorageError::Database)?;
                let stats: StepStats = serde_json::from_str(&stats)?;
                let failure: Option<RunFailure> =
                    failure.as_deref().map(serde_json::from_str).transpose()?;

                runs.push(RunSummary {
                    run_id,
                    job_name,
                    outcome,
                    triggered_at: from_micros("triggered_at", triggered_us)?,
                    finished_at: from_micros("finished_at", finished_us)?,
                    skip_count,
                    skip_limit,
                    stats,
                    failure,
                });
            }
            Ok::<_, StorageError>(runs)
        })
        .await
        .map_err(join_error)?
    }
}

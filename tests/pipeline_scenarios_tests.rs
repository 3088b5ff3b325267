/// Pipeline scenario tests
///
/// Each test drives complete runs: an in-memory partitioned log feeds the
/// stream reader, the chunk engine filters and writes into an in-memory
/// DuckDB store, and the outcome, stored rows and committed offsets are
/// checked afterwards.
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use logbatch::batch::{
    ChunkWriter, JobRunner, RunContext, RunOutcome, StoreWriter, WriteFault,
};
use logbatch::config::{parse_config, StartPosition};
use logbatch::source::{AccessLogEvent, ReaderSettings};
use logbatch::storage::{DuckDbStorage, Storage, StorageError};
use logbatch::stream::{MemoryLog, PartitionLog};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TOPIC: &str = "user-access-log";

/// Delegates to a real writer, recording chunk sizes and failing chosen calls.
struct ObservedWriter {
    inner: StoreWriter,
    failing: HashSet<usize>,
    sizes: Mutex<Vec<usize>>,
}

impl ObservedWriter {
    fn new(storage: Arc<DuckDbStorage>, failing: &[usize]) -> Self {
        Self {
            inner: StoreWriter::new(storage),
            failing: failing.iter().copied().collect(),
            sizes: Mutex::new(Vec::new()),
        }
    }

    fn sizes(&self) -> Vec<usize> {
        self.sizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChunkWriter for ObservedWriter {
    async fn write(&self, chunk: &[AccessLogEvent]) -> Result<(), WriteFault> {
        let call = {
            let mut sizes = self.sizes.lock().unwrap();
            sizes.push(chunk.len());
            sizes.len() - 1
        };
        if self.failing.contains(&call) {
            return Err(WriteFault {
                len: chunk.len(),
                source: StorageError::Database("connection lost".to_string()),
            });
        }
        self.inner.write(chunk).await
    }
}

struct Fixture {
    log: Arc<MemoryLog>,
    storage: Arc<DuckDbStorage>,
    writer: Arc<ObservedWriter>,
    job: JobRunner,
}

fn settings(partitions: Vec<u32>, start_position: StartPosition) -> ReaderSettings {
    ReaderSettings {
        topic: TOPIC.to_string(),
        group_id: "access-log-batch".to_string(),
        client_id: "scenario".to_string(),
        partitions,
        poll_timeout: Duration::from_millis(100),
        poll_interval: Duration::from_millis(10),
        max_poll_records: 500,
        auto_commit_interval: Duration::from_secs(1),
        start_position,
    }
}

async fn fixture(chunk_size: usize, skip_limit: u32, failing: &[usize]) -> Fixture {
    fixture_with(chunk_size, skip_limit, failing, StartPosition::Earliest).await
}

async fn fixture_with(
    chunk_size: usize,
    skip_limit: u32,
    failing: &[usize],
    start_position: StartPosition,
) -> Fixture {
    let log = Arc::new(MemoryLog::with_topic(TOPIC, 3).unwrap());
    let storage = Arc::new(DuckDbStorage::in_memory().unwrap());
    storage.init_schema().await.unwrap();
    let writer = Arc::new(ObservedWriter::new(storage.clone(), failing));

    let job = JobRunner::new(
        "accessLogProcessJob",
        log.clone(),
        settings(vec![0, 1, 2], start_position),
        writer.clone(),
        chunk_size,
        skip_limit,
    );

    Fixture {
        log,
        storage,
        writer,
        job,
    }
}

fn event(i: usize) -> AccessLogEvent {
    AccessLogEvent {
        user_id: format!("user-{}", i % 7),
        ip_address: format!("192.168.0.{}", i % 250),
        user_agent: if i % 3 == 0 {
            String::new()
        } else {
            format!("Mozilla/5.0 (test {})", i)
        },
        request_url: format!("/api/data/{}", i),
        method: ["GET", "POST", "PUT", "DELETE"][i % 4].to_string(),
        access_time: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
            + chrono::Duration::milliseconds(i as i64 * 1500),
    }
}

/// Append to a single partition so delivery order is the append order.
fn append(log: &MemoryLog, partition: u32, payload: String) {
    log.append(TOPIC, partition, None, payload).unwrap();
}

async fn run(job: &JobRunner, run_id: &str) -> (RunOutcome, RunContext) {
    let mut ctx = job.context(run_id, Utc::now());
    let outcome = job.run(&mut ctx).await.unwrap();
    (outcome, ctx)
}

async fn stored_events(storage: &DuckDbStorage) -> Vec<AccessLogEvent> {
    storage
        .list_access_logs(10_000, 0)
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.event)
        .collect()
}

#[tokio::test]
async fn test_full_chunks_then_partial_chunk() {
    let f = fixture(100, 10, &[]).await;
    for i in 0..250 {
        append(&f.log, 0, event(i).to_payload().unwrap());
    }

    let (outcome, ctx) = run(&f.job, "1").await;

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(f.storage.count_access_logs().await.unwrap(), 250);
    assert_eq!(f.writer.sizes(), vec![100, 100, 50]);
    assert_eq!(ctx.skip_count(), 0);
    assert_eq!(ctx.stats().commit_count, 3);
}

#[tokio::test]
async fn test_undecodable_record_costs_one_skip() {
    let f = fixture(100, 10, &[]).await;
    for i in 0..5 {
        let payload = if i == 2 {
            r#"{"userId": "user-2", "ipAddress": "#.to_string()
        } else {
            event(i).to_payload().unwrap()
        };
        append(&f.log, 1, payload);
    }

    let (outcome, ctx) = run(&f.job, "1").await;

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(ctx.skip_count(), 1);
    let stored = stored_events(&f.storage).await;
    assert_eq!(stored, vec![event(0), event(1), event(3), event(4)]);
}

#[tokio::test]
async fn test_write_faults_over_budget_fail_the_run() {
    // The second chunk's write fault alone charges 2 > 1
    let f = fixture(2, 1, &[1, 2]).await;
    for i in 0..6 {
        append(&f.log, 0, event(i).to_payload().unwrap());
    }

    let (outcome, ctx) = run(&f.job, "1").await;

    assert_eq!(outcome, RunOutcome::Failed);
    assert!(ctx.skip_count() > ctx.skip_limit());
    // Only the first, successful chunk was persisted and nothing ran after the fault
    assert_eq!(stored_events(&f.storage).await, vec![event(0), event(1)]);
    assert_eq!(f.writer.sizes(), vec![2, 2]);
}

#[tokio::test]
async fn test_second_consecutive_write_fault_exceeds_budget() {
    let f = fixture(2, 3, &[1, 2]).await;
    for i in 0..8 {
        append(&f.log, 0, event(i).to_payload().unwrap());
    }

    let (outcome, ctx) = run(&f.job, "1").await;

    assert_eq!(outcome, RunOutcome::Failed);
    assert_eq!(ctx.skip_count(), 4);
    assert_eq!(ctx.stats().rollback_count, 2);
    assert_eq!(stored_events(&f.storage).await, vec![event(0), event(1)]);
    assert_eq!(f.writer.sizes(), vec![2, 2, 2]);
}

#[tokio::test]
async fn test_no_messages_is_empty_run() {
    let f = fixture(100, 10, &[]).await;

    let (outcome, ctx) = run(&f.job, "1").await;

    assert_eq!(outcome, RunOutcome::Empty);
    assert_eq!(ctx.skip_count(), 0);
    assert!(ctx.failure().is_none());
    assert_eq!(f.storage.count_access_logs().await.unwrap(), 0);
    assert!(f.writer.sizes().is_empty());
}

#[tokio::test]
async fn test_filtered_records_never_cost_budget() {
    let f = fixture(10, 0, &[]).await;
    let mut blank = event(1);
    blank.request_url = " ".to_string();

    append(&f.log, 0, "null".to_string());
    append(&f.log, 0, blank.to_payload().unwrap());
    append(&f.log, 0, event(2).to_payload().unwrap());

    let (outcome, ctx) = run(&f.job, "1").await;

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(ctx.skip_count(), 0);
    assert_eq!(ctx.stats().filter_count, 2);
    assert_eq!(stored_events(&f.storage).await, vec![event(2)]);
}

#[tokio::test]
async fn test_rows_do_not_depend_on_chunk_size() {
    let input: Vec<AccessLogEvent> = (0..23).map(event).collect();

    let mut results = Vec::new();
    for chunk_size in [1, 4, 10, 100] {
        let f = fixture(chunk_size, 10, &[]).await;
        for e in &input {
            append(&f.log, 2, e.to_payload().unwrap());
        }
        let (outcome, _) = run(&f.job, "1").await;
        assert_eq!(outcome, RunOutcome::Completed);
        results.push(stored_events(&f.storage).await);
    }

    for stored in &results {
        assert_eq!(stored, &input);
    }
}

#[tokio::test]
async fn test_quiet_stream_defers_late_data_to_next_run() {
    let f = fixture_with(100, 10, &[], StartPosition::Latest).await;

    let (outcome, _) = run(&f.job, "1").await;
    assert_eq!(outcome, RunOutcome::Empty);

    // Arrives after the first run already gave up
    append(&f.log, 1, event(1).to_payload().unwrap());
    append(&f.log, 2, event(2).to_payload().unwrap());

    let (outcome, ctx) = run(&f.job, "2").await;
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(ctx.stats().write_count, 2);
    assert_eq!(f.storage.count_access_logs().await.unwrap(), 2);
}

#[tokio::test]
async fn test_offsets_advance_even_when_chunks_fail() {
    let f = fixture(2, 100, &[0, 1]).await;
    for i in 0..3 {
        append(&f.log, 0, event(i).to_payload().unwrap());
    }
    append(&f.log, 1, event(3).to_payload().unwrap());

    let (outcome, ctx) = run(&f.job, "1").await;
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(ctx.skip_count(), 4);
    assert_eq!(f.storage.count_access_logs().await.unwrap(), 0);

    let committed = f.log.committed("access-log-batch", TOPIC).await.unwrap();
    assert_eq!(committed.get(&0), Some(&3));
    assert_eq!(committed.get(&1), Some(&1));

    // The failed events are not redelivered
    let (outcome, _) = run(&f.job, "2").await;
    assert_eq!(outcome, RunOutcome::Empty);
}

#[tokio::test]
async fn test_skip_budget_is_per_run() {
    let f = fixture(100, 1, &[]).await;
    append(&f.log, 0, "{".to_string());

    let (outcome, ctx) = run(&f.job, "1").await;
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(ctx.skip_count(), 1);

    append(&f.log, 0, "{".to_string());
    append(&f.log, 0, event(1).to_payload().unwrap());

    let (outcome, ctx) = run(&f.job, "2").await;
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(ctx.skip_count(), 1);
    assert_eq!(f.storage.count_access_logs().await.unwrap(), 1);
}

#[tokio::test]
async fn test_embedded_broker_keeps_events_published_before_first_run() {
    // Default start position; only the poll window is shortened
    let config = parse_config(
        r#"
stream:
  poll_timeout: 200ms
storage:
  path: /tmp/unused.duckdb
"#,
    )
    .unwrap();
    assert_eq!(config.stream.start_position, StartPosition::Latest);

    let log = Arc::new(
        MemoryLog::with_topic(&config.stream.topic, config.stream.embedded_partitions).unwrap(),
    );
    let storage = Arc::new(DuckDbStorage::in_memory().unwrap());
    storage.init_schema().await.unwrap();
    let job = JobRunner::from_config(&config, log.clone(), Arc::new(StoreWriter::new(storage.clone())));

    for i in 0..5 {
        let e = event(i);
        log.publish(&config.stream.topic, Some(&e.user_id), e.to_payload().unwrap())
            .await
            .unwrap();
    }

    let (outcome, ctx) = run(&job, "1").await;
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(ctx.stats().write_count, 5);
    assert_eq!(storage.count_access_logs().await.unwrap(), 5);

    let committed = log.committed(&config.stream.group_id, &config.stream.topic).await.unwrap();
    assert_eq!(committed.values().sum::<u64>(), 5);

    let (outcome, _) = run(&job, "2").await;
    assert_eq!(outcome, RunOutcome::Empty);
}

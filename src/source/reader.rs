use crate::config::types::{StartPosition, StreamConfig};
use crate::source::event::AccessLogEvent;
use crate::stream::{Offsets, PartitionLog, StreamError, StreamRecord};
use async_trait::async_trait;
use futures::future::try_join_all;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ReadFault {
    #[error("malformed record at partition {partition} offset {offset}: {source}")]
    Malformed {
        partition: u32,
        offset: u64,
        #[source]
        source: serde_json::Error,
    },

    #[error("stream error: {0}")]
    Stream(#[from] StreamError),
}

impl ReadFault {
    /// Whether the fault concerns a single record rather than the stream itself.
    pub fn is_skippable(&self) -> bool {
        matches!(self, ReadFault::Malformed { .. })
    }
}

/// One record handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub partition: u32,
    pub offset: u64,
    /// `None` when the record carried a JSON `null`
    pub event: Option<AccessLogEvent>,
}

/// Source of events for one run.
#[async_trait]
pub trait EventReader: Send {
    /// Next record, or `None` once nothing arrived within the poll timeout.
    async fn next(&mut self) -> Result<Option<Delivered>, ReadFault>;
}

#[derive(Debug, Clone)]
pub struct ReaderSettings {
    pub topic: String,
    pub group_id: String,
    pub client_id: String,
    pub partitions: Vec<u32>,
    pub poll_timeout: Duration,
    pub poll_interval: Duration,
    /// Per partition, per fetch
    pub max_poll_records: usize,
    pub auto_commit_interval: Duration,
    pub start_position: StartPosition,
}

impl ReaderSettings {
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            topic: config.topic.clone(),
            group_id: config.group_id.clone(),
            client_id: config.client_id(),
            partitions: config.partitions.clone(),
            poll_timeout: config.poll_timeout,
            poll_interval: config.poll_interval,
            max_poll_records: config.max_poll_records,
            auto_commit_interval: config.auto_commit_interval,
            start_position: config.effective_start_position(),
        }
    }
}

/// Reads a statically assigned set of partitions of one topic.
///
/// Positions start from the group's committed offsets and advance as records
/// are delivered, whether or not the caller later manages to store them.
/// Delivered positions are committed back to the stream every
/// `auto_commit_interval` and on [`StreamReader::close`]; resumption after a
/// crash therefore depends only on that commit cadence.
pub struct StreamReader {
    log: Arc<dyn PartitionLog>,
    settings: ReaderSettings,

    /// Next offset to fetch, per partition
    fetch_positions: Offsets,
    /// Offset after the last delivered record, per partition
    delivered: Offsets,
    /// Last offsets known to be committed for the group
    committed: Offsets,

    buffer: VecDeque<StreamRecord>,
    last_commit: Instant,
    delivered_count: u64,
}

impl StreamReader {
    /// Resolve start positions and prepare to read.
    pub async fn open(
        log: Arc<dyn PartitionLog>,
        settings: ReaderSettings,
    ) -> Result<Self, StreamError> {
        let group_offsets = log.committed(&settings.group_id, &settings.topic).await?;

        let mut positions = Offsets::new();
        let mut committed = Offsets::new();
        for &partition in &settings.partitions {
            // Also validates that the partition exists
            let end = log.end_offset(&settings.topic, partition).await?;

            let position = match group_offsets.get(&partition) {
                Some(&offset) => {
                    committed.insert(partition, offset);
                    offset
                }
                None => match settings.start_position {
                    StartPosition::Earliest => 0,
                    StartPosition::Latest => end,
                },
            };
            positions.insert(partition, position);
        }

        info!(
            topic = %settings.topic,
            group_id = %settings.group_id,
            client_id = %settings.client_id,
            positions = ?positions,
            "Opened stream reader"
        );

        Ok(Self {
            log,
            settings,
            fetch_positions: positions.clone(),
            delivered: positions,
            committed,
            buffer: VecDeque::new(),
            last_commit: Instant::now(),
            delivered_count: 0,
        })
    }

    /// Positions after the last delivered record, per partition
    pub fn positions(&self) -> &Offsets {
        &self.delivered
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered_count
    }

    /// Commit delivered positions and release the reader.
    pub async fn close(mut self) -> Result<Offsets, StreamError> {
        if !self.buffer.is_empty() {
            debug!(
                undelivered = self.buffer.len(),
                "Closing with fetched records that were never delivered"
            );
        }

        self.commit().await?;

        info!(
            topic = %self.settings.topic,
            group_id = %self.settings.group_id,
            delivered = self.delivered_count,
            positions = ?self.delivered,
            "Closed stream reader"
        );

        Ok(self.delivered)
    }

    async fn commit(&mut self) -> Result<(), StreamError> {
        self.last_commit = Instant::now();

        if self.delivered == self.committed {
            return Ok(());
        }

        self.log
            .commit(&self.settings.group_id, &self.settings.topic, &self.delivered)
            .await?;
        self.committed = self.delivered.clone();

        debug!(positions = ?self.committed, "Committed stream offsets");
        Ok(())
    }

    async fn maybe_auto_commit(&mut self) {
        if self.last_commit.elapsed() < self.settings.auto_commit_interval {
            return;
        }

        // A failed auto-commit is retried on the next interval or at close
        if let Err(e) = self.commit().await {
            warn!(error = %e, "Auto-commit of stream offsets failed");
        }
    }

    /// Wait up to the poll timeout for at least one record.
    async fn poll(&mut self) -> Result<bool, StreamError> {
        let deadline = Instant::now() + self.settings.poll_timeout;

        loop {
            if self.fetch_once().await? > 0 {
                return Ok(true);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }

            sleep(self.settings.poll_interval.min(deadline - now)).await;
        }
    }

    /// Fetch once from every assigned partition.
    async fn fetch_once(&mut self) -> Result<usize, StreamError> {
        let log = &self.log;
        let topic = &self.settings.topic;
        let limit = self.settings.max_poll_records;

        let batches = try_join_all(
            self.fetch_positions
                .iter()
                .map(|(&partition, &offset)| log.fetch(topic, partition, offset, limit)),
        )
        .await?;

        let mut fetched = 0;
        for records in batches {
            if let Some(last) = records.last() {
                self.fetch_positions.insert(last.partition, last.offset + 1);
            }
            fetched += records.len();
            self.buffer.extend(records);
        }

        if fetched > 0 {
            debug!(fetched, "Fetched records from stream");
        }

        Ok(fetched)
    }
}

#[async_trait]
impl EventReader for StreamReader {
    async fn next(&mut self) -> Result<Option<Delivered>, ReadFault> {
        self.maybe_auto_commit().await;

        if self.buffer.is_empty() && !self.poll().await? {
            return Ok(None);
        }

        let Some(record) = self.buffer.pop_front() else {
            return Ok(None);
        };

        self.delivered.insert(record.partition, record.offset + 1);
        self.delivered_count += 1;

        match AccessLogEvent::from_payload(&record.payload) {
            Ok(event) => Ok(Some(Delivered {
                partition: record.partition,
                offset: record.offset,
                event,
            })),
            Err(source) => Err(ReadFault::Malformed {
                partition: record.partition,
                offset: record.offset,
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryLog;
    use chrono::{TimeZone, Utc};

    fn settings(partitions: Vec<u32>, start_position: StartPosition) -> ReaderSettings {
        ReaderSettings {
            topic: "logs".to_string(),
            group_id: "batch".to_string(),
            client_id: "test".to_string(),
            partitions,
            poll_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
            max_poll_records: 100,
            auto_commit_interval: Duration::from_secs(60),
            start_position,
        }
    }

    fn payload(user: &str) -> String {
        AccessLogEvent {
            user_id: user.to_string(),
            ip_address: "192.168.0.1".to_string(),
            user_agent: "test".to_string(),
            request_url: "/api/data/1".to_string(),
            method: "GET".to_string(),
            access_time: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        }
        .to_payload()
        .unwrap()
    }

    async fn drain(reader: &mut StreamReader) -> Vec<Delivered> {
        let mut out = Vec::new();
        while let Some(d) = reader.next().await.unwrap() {
            out.push(d);
        }
        out
    }

    #[tokio::test]
    async fn test_earliest_reads_everything_in_partition_order() {
        let log = Arc::new(MemoryLog::with_topic("logs", 2).unwrap());
        log.append("logs", 0, None, payload("a0")).unwrap();
        log.append("logs", 1, None, payload("b0")).unwrap();
        log.append("logs", 0, None, payload("a1")).unwrap();

        let mut reader = StreamReader::open(log.clone(), settings(vec![0, 1], StartPosition::Earliest))
            .await
            .unwrap();
        let delivered = drain(&mut reader).await;

        let p0: Vec<_> = delivered
            .iter()
            .filter(|d| d.partition == 0)
            .map(|d| d.event.as_ref().unwrap().user_id.clone())
            .collect();
        assert_eq!(p0, vec!["a0", "a1"]);
        assert_eq!(delivered.len(), 3);
        assert_eq!(reader.positions(), &Offsets::from([(0, 2), (1, 1)]));
    }

    #[tokio::test]
    async fn test_only_assigned_partitions_are_read() {
        let log = Arc::new(MemoryLog::with_topic("logs", 3).unwrap());
        log.append("logs", 2, None, payload("skip-me")).unwrap();
        log.append("logs", 0, None, payload("keep")).unwrap();

        let mut reader = StreamReader::open(log, settings(vec![0], StartPosition::Earliest))
            .await
            .unwrap();
        let delivered = drain(&mut reader).await;

        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].event.as_ref().unwrap().user_id, "keep");
    }

    #[tokio::test]
    async fn test_latest_skips_backlog_and_commits_on_close() {
        let log = Arc::new(MemoryLog::with_topic("logs", 1).unwrap());
        log.append("logs", 0, None, payload("old")).unwrap();

        let mut reader = StreamReader::open(log.clone(), settings(vec![0], StartPosition::Latest))
            .await
            .unwrap();
        assert!(drain(&mut reader).await.is_empty());
        reader.close().await.unwrap();
        assert_eq!(log.committed("batch", "logs").await.unwrap(), Offsets::from([(0, 1)]));

        log.append("logs", 0, None, payload("new")).unwrap();
        let mut reader = StreamReader::open(log, settings(vec![0], StartPosition::Latest))
            .await
            .unwrap();
        let delivered = drain(&mut reader).await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].event.as_ref().unwrap().user_id, "new");
    }

    #[tokio::test]
    async fn test_resumes_from_committed_offsets() {
        let log = Arc::new(MemoryLog::with_topic("logs", 1).unwrap());
        for user in ["u0", "u1", "u2"] {
            log.append("logs", 0, None, payload(user)).unwrap();
        }
        log.commit("batch", "logs", &Offsets::from([(0, 2)])).await.unwrap();

        let mut reader = StreamReader::open(log, settings(vec![0], StartPosition::Earliest))
            .await
            .unwrap();
        let delivered = drain(&mut reader).await;

        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].offset, 2);
    }

    #[tokio::test]
    async fn test_malformed_record_is_skippable_and_consumed() {
        let log = Arc::new(MemoryLog::with_topic("logs", 1).unwrap());
        log.append("logs", 0, None, payload("first")).unwrap();
        log.append("logs", 0, None, "{not json".to_string()).unwrap();
        log.append("logs", 0, None, payload("third")).unwrap();

        let mut reader = StreamReader::open(log, settings(vec![0], StartPosition::Earliest))
            .await
            .unwrap();

        assert!(reader.next().await.unwrap().is_some());
        let fault = reader.next().await.unwrap_err();
        assert!(fault.is_skippable());
        assert!(matches!(fault, ReadFault::Malformed { offset: 1, .. }));

        let third = reader.next().await.unwrap().unwrap();
        assert_eq!(third.offset, 2);
        assert_eq!(reader.positions(), &Offsets::from([(0, 3)]));
    }

    #[tokio::test]
    async fn test_null_payload_is_delivered_as_absent() {
        let log = Arc::new(MemoryLog::with_topic("logs", 1).unwrap());
        log.append("logs", 0, None, "null".to_string()).unwrap();

        let mut reader = StreamReader::open(log, settings(vec![0], StartPosition::Earliest))
            .await
            .unwrap();
        let delivered = reader.next().await.unwrap().unwrap();

        assert_eq!(delivered.event, None);
        assert_eq!(delivered.offset, 0);
    }

    #[tokio::test]
    async fn test_unknown_partition_fails_open() {
        let log = Arc::new(MemoryLog::with_topic("logs", 1).unwrap());
        let result = StreamReader::open(log, settings(vec![0, 4], StartPosition::Earliest)).await;
        assert!(matches!(
            result,
            Err(StreamError::UnknownPartition { partition: 4, .. })
        ));
    }

    #[tokio::test]
    async fn test_quiet_stream_ends_after_poll_timeout() {
        let log = Arc::new(MemoryLog::with_topic("logs", 1).unwrap());
        let mut reader = StreamReader::open(log, settings(vec![0], StartPosition::Earliest))
            .await
            .unwrap();

        let started = std::time::Instant::now();
        assert!(reader.next().await.unwrap().is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_record_arriving_during_poll_is_delivered() {
        let log = Arc::new(MemoryLog::with_topic("logs", 1).unwrap());
        let mut s = settings(vec![0], StartPosition::Earliest);
        s.poll_timeout = Duration::from_secs(2);
        let mut reader = StreamReader::open(log.clone(), s).await.unwrap();

        let producer = log.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            producer.append("logs", 0, None, payload("late")).unwrap();
        });

        let delivered = reader.next().await.unwrap().unwrap();
        assert_eq!(delivered.event.unwrap().user_id, "late");
    }

    #[tokio::test]
    async fn test_auto_commit_while_reading() {
        let log = Arc::new(MemoryLog::with_topic("logs", 1).unwrap());
        for user in ["u0", "u1"] {
            log.append("logs", 0, None, payload(user)).unwrap();
        }

        let mut s = settings(vec![0], StartPosition::Earliest);
        s.auto_commit_interval = Duration::ZERO;
        let mut reader = StreamReader::open(log.clone(), s).await.unwrap();

        reader.next().await.unwrap();
        reader.next().await.unwrap();
        // The commit for the first delivery happens before the second
        assert_eq!(log.committed("batch", "logs").await.unwrap(), Offsets::from([(0, 1)]));

        let positions = reader.close().await.unwrap();
        assert_eq!(positions, Offsets::from([(0, 2)]));
        assert_eq!(log.committed("batch", "logs").await.unwrap(), Offsets::from([(0, 2)]));
    }
}

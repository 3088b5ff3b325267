use super::log::{Offsets, PartitionLog, RecordPosition, StreamError, StreamRecord};
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Pick the partition for a keyed record.
pub fn partition_for_key(key: &str, partitions: u32) -> u32 {
    let digest = Sha256::digest(key.as_bytes());
    let hash = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    hash % partitions.max(1)
}

#[derive(Debug, Default)]
struct TopicLog {
    partitions: Vec<Vec<StreamRecord>>,
    next_keyless: usize,
}

#[derive(Debug, Default)]
struct Inner {
    topics: HashMap<String, TopicLog>,
    /// (group, topic) -> committed offsets
    groups: HashMap<(String, String), Offsets>,
}

/// In-process partition log.
///
/// Backs the embedded broker and tests. Nothing is persisted: committed
/// offsets last as long as the process.
#[derive(Debug, Default)]
pub struct MemoryLog {
    inner: Mutex<Inner>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log holding one topic.
    pub fn with_topic(topic: &str, partitions: u32) -> Result<Self, StreamError> {
        let log = Self::new();
        log.create_topic(topic, partitions)?;
        Ok(log)
    }

    /// Create `topic`, or grow it to `partitions` if it has fewer.
    pub fn create_topic(&self, topic: &str, partitions: u32) -> Result<(), StreamError> {
        if topic.is_empty() {
            return Err(StreamError::InvalidRequest("topic name cannot be empty".to_string()));
        }
        if partitions == 0 {
            return Err(StreamError::InvalidRequest(format!(
                "topic {} needs at least one partition",
                topic
            )));
        }

        let mut inner = self.lock();
        let log = inner.topics.entry(topic.to_string()).or_default();
        while log.partitions.len() < partitions as usize {
            log.partitions.push(Vec::new());
        }
        Ok(())
    }

    pub fn partition_count(&self, topic: &str) -> Option<u32> {
        self.lock()
            .topics
            .get(topic)
            .map(|log| log.partitions.len() as u32)
    }

    /// Append a raw payload to an explicit partition.
    pub fn append(
        &self,
        topic: &str,
        partition: u32,
        key: Option<&str>,
        payload: String,
    ) -> Result<RecordPosition, StreamError> {
        let mut inner = self.lock();
        let log = topic_mut(&mut inner, topic)?;
        append_to(log, topic, partition, key, payload)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave a partition half-written
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn topic_mut<'a>(inner: &'a mut Inner, topic: &str) -> Result<&'a mut TopicLog, StreamError> {
    inner
        .topics
        .get_mut(topic)
        .ok_or_else(|| StreamError::UnknownTopic(topic.to_string()))
}

fn append_to(
    log: &mut TopicLog,
    topic: &str,
    partition: u32,
    key: Option<&str>,
    payload: String,
) -> Result<RecordPosition, StreamError> {
    let records = log
        .partitions
        .get_mut(partition as usize)
        .ok_or_else(|| StreamError::UnknownPartition {
            topic: topic.to_string(),
            partition,
        })?;

    let offset = records.len() as u64;
    records.push(StreamRecord {
        partition,
        offset,
        key: key.map(str::to_string),
        payload,
        timestamp: Utc::now(),
    });

    Ok(RecordPosition { partition, offset })
}

#[async_trait]
impl PartitionLog for MemoryLog {
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: String,
    ) -> Result<RecordPosition, StreamError> {
        let mut inner = self.lock();
        let log = topic_mut(&mut inner, topic)?;
        let partitions = log.partitions.len() as u32;

        let partition = match key {
            Some(key) => partition_for_key(key, partitions),
            None => {
                let partition = (log.next_keyless % partitions as usize) as u32;
                log.next_keyless = log.next_keyless.wrapping_add(1);
                partition
            }
        };

        append_to(log, topic, partition, key, payload)
    }

    async fn fetch(
        &self,
        topic: &str,
        partition: u32,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<StreamRecord>, StreamError> {
        let inner = self.lock();
        let log = inner
            .topics
            .get(topic)
            .ok_or_else(|| StreamError::UnknownTopic(topic.to_string()))?;
        let records = log
            .partitions
            .get(partition as usize)
            .ok_or_else(|| StreamError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            })?;

        Ok(records
            .iter()
            .skip(offset as usize)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn end_offset(&self, topic: &str, partition: u32) -> Result<u64, StreamError> {
        let inner = self.lock();
        let log = inner
            .topics
            .get(topic)
            .ok_or_else(|| StreamError::UnknownTopic(topic.to_string()))?;

        log.partitions
            .get(partition as usize)
            .map(|records| records.len() as u64)
            .ok_or_else(|| StreamError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            })
    }

    async fn committed(&self, group: &str, topic: &str) -> Result<Offsets, StreamError> {
        let inner = self.lock();
        if !inner.topics.contains_key(topic) {
            return Err(StreamError::UnknownTopic(topic.to_string()));
        }

        Ok(inner
            .groups
            .get(&(group.to_string(), topic.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn commit(&self, group: &str, topic: &str, offsets: &Offsets) -> Result<(), StreamError> {
        let mut inner = self.lock();
        let partitions = topic_mut(&mut inner, topic)?.partitions.len() as u32;

        if let Some(partition) = offsets.keys().find(|p| **p >= partitions) {
            return Err(StreamError::UnknownPartition {
                topic: topic.to_string(),
                partition: *partition,
            });
        }

        let committed = inner
            .groups
            .entry((group.to_string(), topic.to_string()))
            .or_default();
        for (partition, offset) in offsets {
            let current = committed.entry(*partition).or_insert(0);
            *current = (*current).max(*offset);
        }

        Ok(())
    }
}

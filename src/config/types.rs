use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub stream: StreamConfig,
    #[serde(default)]
    pub job: JobConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Base URLs of remote brokers, tried in order. Empty runs the embedded broker.
    #[serde(default)]
    pub brokers: Vec<String>,
    /// Partition count of the topic when the embedded broker is used
    #[serde(default = "default_embedded_partitions")]
    pub embedded_partitions: u32,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_group_id")]
    pub group_id: String,
    /// Identifies this consumer in logs; defaults to the hostname
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default = "default_partitions")]
    pub partitions: Vec<u32>,
    #[serde(default = "default_poll_timeout", with = "humantime_serde")]
    pub poll_timeout: Duration,
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(default = "default_max_poll_records")]
    pub max_poll_records: usize,
    #[serde(default = "default_auto_commit_interval", with = "humantime_serde")]
    pub auto_commit_interval: Duration,
    #[serde(default)]
    pub start_position: StartPosition,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

fn default_embedded_partitions() -> u32 {
    3
}

fn default_topic() -> String {
    "user-access-log".to_string()
}

fn default_group_id() -> String {
    "access-log-batch".to_string()
}

fn default_partitions() -> Vec<u32> {
    vec![0, 1, 2]
}

fn default_poll_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_max_poll_records() -> usize {
    500
}

fn default_auto_commit_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            brokers: Vec::new(),
            embedded_partitions: default_embedded_partitions(),
            topic: default_topic(),
            group_id: default_group_id(),
            client_id: None,
            partitions: default_partitions(),
            poll_timeout: default_poll_timeout(),
            poll_interval: default_poll_interval(),
            max_poll_records: default_max_poll_records(),
            auto_commit_interval: default_auto_commit_interval(),
            start_position: StartPosition::default(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl StreamConfig {
    pub fn uses_embedded_broker(&self) -> bool {
        self.brokers.is_empty()
    }

    /// Start position actually used for a group without committed offsets.
    ///
    /// The embedded log starts empty with each process, so everything in it
    /// was published after startup and is read from the beginning.
    pub fn effective_start_position(&self) -> StartPosition {
        if self.uses_embedded_broker() {
            StartPosition::Earliest
        } else {
            self.start_position
        }
    }

    pub fn client_id(&self) -> String {
        self.client_id.clone().unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "logbatch".to_string())
        })
    }
}

/// Where a consumer group without committed offsets starts reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartPosition {
    Earliest,
    #[default]
    Latest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default = "default_job_name")]
    pub name: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_skip_limit")]
    pub skip_limit: u32,
}

fn default_job_name() -> String {
    "accessLogProcessJob".to_string()
}

fn default_chunk_size() -> usize {
    100
}

fn default_skip_limit() -> u32 {
    10
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            name: default_job_name(),
            chunk_size: default_chunk_size(),
            skip_limit: default_skip_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_every", with = "humantime_serde")]
    pub every: Duration,
    #[serde(default)]
    pub run_on_start: bool,
}

fn default_every() -> Duration {
    Duration::from_secs(60)
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            every: default_every(),
            run_on_start: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_web_enabled")]
    pub enabled: bool,
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_web_enabled() -> bool {
    true
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: default_web_enabled(),
            listen: default_listen(),
        }
    }
}

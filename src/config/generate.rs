pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# LOGBATCH CONFIGURATION
# =============================================================================
# Drains access-log events from a partitioned stream into DuckDB on a fixed
# schedule, one chunk (transaction) at a time.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/logbatch/config.yml
#   3. /etc/logbatch/config.yml
#
# Any value may reference an environment variable with the $env{...} syntax.

# =============================================================================
# STREAM
# =============================================================================
stream:
  # Base URLs of remote brokers, tried in order. Leave empty to run the
  # embedded broker, served by this process under /stream on web.listen.
  brokers: []

  # Partition count of the topic on the embedded broker
  embedded_partitions: 3

  topic: user-access-log
  group_id: access-log-batch

  # Partitions this consumer reads. Assignment is static.
  partitions: [0, 1, 2]

  # A run ends once no record arrives within this window
  poll_timeout: 5s
  poll_interval: 100ms
  max_poll_records: 500

  # Delivered offsets are committed to the stream at this cadence and when
  # a run ends. A restart resumes from the last commit.
  auto_commit_interval: 1s

  # Where a group without committed offsets starts: 'latest' or 'earliest'.
  # Only applies to remote brokers; the embedded broker is read from the start.
  start_position: latest

  request_timeout: 10s

# =============================================================================
# JOB
# =============================================================================
job:
  name: accessLogProcessJob

  # Events per transaction
  chunk_size: 100

  # Fault units tolerated per run. A malformed record costs 1; a failed
  # chunk write costs the number of events in the chunk.
  skip_limit: 10

# =============================================================================
# SCHEDULE
# =============================================================================
schedule:
  every: 1m
  # Fire the first run immediately instead of after one period
  run_on_start: false

# =============================================================================
# STORAGE
# =============================================================================
storage:
  path: ~/.local/share/logbatch/access_log.duckdb

# =============================================================================
# WEB
# =============================================================================
web:
  enabled: true
  listen: 127.0.0.1:8080
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn test_starter_config_is_valid() {
        let config = parse_config(&generate_starter_config()).unwrap();
        assert_eq!(config.job.chunk_size, 100);
        assert_eq!(config.job.skip_limit, 10);
        assert_eq!(config.stream.partitions, vec![0, 1, 2]);
        assert!(config.stream.uses_embedded_broker());
    }
}

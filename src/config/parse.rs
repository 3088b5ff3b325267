use super::types::*;
use crate::config::{expand_env_vars, expand_tilde, is_valid_stream_name, unexpanded_env_vars};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })
}

/// Parse and validate config from YAML text.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    // Expand environment variables in the YAML string before parsing
    let yaml = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml)?;

    let mut config: Config = serde_yaml::from_str(&yaml)?;
    config.storage.path = expand_tilde(&config.storage.path);

    validate_config(&config)?;
    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml: &str) -> Result<(), ConfigError> {
    let unexpanded = unexpanded_env_vars(yaml);

    match unexpanded.as_slice() {
        [] => Ok(()),
        [single] => Err(ConfigError::Validation(format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=...\n\
             2. Replace $env{{{0}}} in the config file with an actual value",
            single
        ))),
        many => Err(ConfigError::Validation(format!(
            "Environment variables are not set: {}",
            many.join(", ")
        ))),
    }
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    let stream = &config.stream;
    if stream.topic.trim().is_empty() {
        errors.push("stream.topic cannot be empty".to_string());
    } else if !is_valid_stream_name(&stream.topic) {
        errors.push(format!(
            "stream.topic: '{}' may only contain letters, digits, '.', '_' and '-'",
            stream.topic
        ));
    }
    if stream.group_id.trim().is_empty() {
        errors.push("stream.group_id cannot be empty".to_string());
    } else if !is_valid_stream_name(&stream.group_id) {
        errors.push(format!(
            "stream.group_id: '{}' may only contain letters, digits, '.', '_' and '-'",
            stream.group_id
        ));
    }
    if stream.partitions.is_empty() {
        errors.push("stream.partitions must list at least one partition".to_string());
    }

    let mut seen = HashSet::new();
    for partition in &stream.partitions {
        if !seen.insert(partition) {
            errors.push(format!("stream.partitions lists partition {} twice", partition));
        }
    }

    if stream.poll_timeout.is_zero() {
        errors.push("stream.poll_timeout must be greater than zero".to_string());
    }
    if stream.poll_interval.is_zero() {
        errors.push("stream.poll_interval must be greater than zero".to_string());
    }
    if stream.max_poll_records == 0 {
        errors.push("stream.max_poll_records must be at least 1".to_string());
    }

    if stream.uses_embedded_broker() {
        if stream.embedded_partitions == 0 {
            errors.push("stream.embedded_partitions must be at least 1".to_string());
        }
        for partition in &stream.partitions {
            if *partition >= stream.embedded_partitions {
                errors.push(format!(
                    "stream.partitions: partition {} does not exist on the embedded broker ({} partitions)",
                    partition, stream.embedded_partitions
                ));
            }
        }
        // Producers publish to every embedded partition
        let unread: Vec<String> = (0..stream.embedded_partitions)
            .filter(|p| !stream.partitions.contains(p))
            .map(|p| p.to_string())
            .collect();
        if !unread.is_empty() {
            errors.push(format!(
                "stream.partitions must cover every embedded partition; partition(s) {} would never be read",
                unread.join(", ")
            ));
        }
    }

    for broker in &stream.brokers {
        if !broker.starts_with("http://") && !broker.starts_with("https://") {
            errors.push(format!(
                "stream.brokers: '{}' must start with http:// or https://",
                broker
            ));
        }
    }

    if config.job.name.trim().is_empty() {
        errors.push("job.name cannot be empty".to_string());
    }
    if config.job.chunk_size == 0 {
        errors.push("job.chunk_size must be at least 1".to_string());
    }

    if config.schedule.every.is_zero() {
        errors.push("schedule.every must be greater than zero".to_string());
    }

    if config.storage.path.as_os_str().is_empty() {
        errors.push("storage.path cannot be empty".to_string());
    }

    if config.web.enabled && config.web.listen.parse::<std::net::SocketAddr>().is_err() {
        errors.push(format!(
            "web.listen: '{}' is not a valid socket address",
            config.web.listen
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const MINIMAL: &str = r#"
stream: {}
storage:
  path: /tmp/logbatch-test.duckdb
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL).unwrap();

        assert!(config.stream.uses_embedded_broker());
        assert_eq!(config.stream.topic, "user-access-log");
        assert_eq!(config.stream.partitions, vec![0, 1, 2]);
        assert_eq!(config.stream.poll_timeout, Duration::from_secs(5));
        assert_eq!(config.stream.start_position, StartPosition::Latest);
        assert_eq!(config.job.chunk_size, 100);
        assert_eq!(config.job.skip_limit, 10);
        assert_eq!(config.schedule.every, Duration::from_secs(60));
        assert!(config.web.enabled);
    }

    #[test]
    fn test_durations_are_humantime() {
        let config = parse_config(
            r#"
stream:
  poll_timeout: 250ms
  auto_commit_interval: 2s
schedule:
  every: 5m
storage:
  path: /tmp/x.duckdb
"#,
        )
        .unwrap();

        assert_eq!(config.stream.poll_timeout, Duration::from_millis(250));
        assert_eq!(config.stream.auto_commit_interval, Duration::from_secs(2));
        assert_eq!(config.schedule.every, Duration::from_secs(300));
    }

    #[test]
    fn test_validation_collects_every_problem() {
        let err = parse_config(
            r#"
stream:
  topic: ""
  partitions: [0, 0, 7]
job:
  chunk_size: 0
storage:
  path: /tmp/x.duckdb
web:
  listen: not-an-address
"#,
        )
        .unwrap_err();

        match err {
            ConfigError::ValidationList(errors) => {
                assert!(errors.iter().any(|e| e.contains("stream.topic")));
                assert!(errors.iter().any(|e| e.contains("twice")));
                assert!(errors.iter().any(|e| e.contains("partition 7")));
                assert!(errors.iter().any(|e| e.contains("job.chunk_size")));
                assert!(errors.iter().any(|e| e.contains("web.listen")));
            }
            other => panic!("expected validation list, got {:?}", other),
        }
    }

    #[test]
    fn test_remote_brokers_must_be_urls() {
        let err = parse_config(
            r#"
stream:
  brokers: ["localhost:9092"]
storage:
  path: /tmp/x.duckdb
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("http://"));
    }

    #[test]
    fn test_remote_brokers_skip_embedded_partition_check() {
        let config = parse_config(
            r#"
stream:
  brokers: ["http://10.0.0.5:8080"]
  embedded_partitions: 1
  partitions: [0, 5]
storage:
  path: /tmp/x.duckdb
"#,
        )
        .unwrap();
        assert!(!config.stream.uses_embedded_broker());
    }

    #[test]
    fn test_embedded_partitions_must_all_be_read() {
        let err = parse_config(
            r#"
stream:
  embedded_partitions: 4
  partitions: [0, 1, 2]
storage:
  path: /tmp/x.duckdb
"#,
        )
        .unwrap_err();

        match err {
            ConfigError::ValidationList(errors) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("partition(s) 3 would never be read"));
            }
            other => panic!("expected validation list, got {:?}", other),
        }
    }

    #[test]
    fn test_stream_names_must_be_path_safe() {
        let err = parse_config(
            r#"
stream:
  topic: "access/log"
  group_id: "batch group?"
storage:
  path: /tmp/x.duckdb
"#,
        )
        .unwrap_err();

        match err {
            ConfigError::ValidationList(errors) => {
                assert!(errors.iter().any(|e| e.contains("stream.topic: 'access/log'")));
                assert!(errors.iter().any(|e| e.contains("stream.group_id: 'batch group?'")));
            }
            other => panic!("expected validation list, got {:?}", other),
        }

        let config = parse_config(
            r#"
stream:
  topic: user-access-log.v2
  group_id: access_log_batch
storage:
  path: /tmp/x.duckdb
"#,
        )
        .unwrap();
        assert_eq!(config.stream.topic, "user-access-log.v2");
    }

    #[test]
    fn test_embedded_broker_reads_from_earliest() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.stream.start_position, StartPosition::Latest);
        assert_eq!(config.stream.effective_start_position(), StartPosition::Earliest);

        let remote = parse_config(
            r#"
stream:
  brokers: ["http://10.0.0.5:8080"]
storage:
  path: /tmp/x.duckdb
"#,
        )
        .unwrap();
        assert_eq!(remote.stream.effective_start_position(), StartPosition::Latest);
    }

    #[test]
    fn test_unexpanded_env_var_is_reported() {
        let err = parse_config(
            r#"
stream: {}
storage:
  path: $env{LOGBATCH_DEFINITELY_UNSET}/db.duckdb
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("LOGBATCH_DEFINITELY_UNSET"));
    }

    #[test]
    fn test_unknown_start_position_is_rejected() {
        let result = parse_config(
            r#"
stream:
  start_position: middle
storage:
  path: /tmp/x.duckdb
"#,
        );
        assert!(matches!(result, Err(ConfigError::YamlParse(_))));
    }
}

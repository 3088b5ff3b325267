use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serializer};
use thiserror::Error;

/// Zone-less formats accepted for `accessTime`, tried in order after RFC 3339.
const LOCAL_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("empty timestamp")]
    Empty,

    #[error("failed to parse timestamp '{value}': expected RFC 3339 or a local date-time")]
    Unrecognized { value: String },
}

/// Parse an access time as written by producers.
///
/// RFC 3339 values keep their offset and are converted to UTC. Local
/// date-times without an offset (`2024-05-01T10:00:00.123`) are taken as UTC.
pub fn parse_access_time(value: &str) -> Result<DateTime<Utc>, TimestampError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(TimestampError::Empty);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    LOCAL_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| TimestampError::Unrecognized {
            value: value.to_string(),
        })
}

/// Serde adapter for `accessTime` fields.
pub mod access_time {
    use super::*;

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse_access_time(&raw).map_err(serde::de::Error::custom)
    }
}

/// Same as [`access_time`] for optional fields; a missing or null value stays `None`.
pub mod optional_access_time {
    use super::*;

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_str(&dt.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|s| parse_access_time(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

use crate::source::timestamp::access_time;
use crate::storage::named::{FieldValue, NamedFields};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One access-log event as it travels through the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessLogEvent {
    pub user_id: String,
    pub ip_address: String,
    #[serde(default)]
    pub user_agent: String,
    pub request_url: String,
    pub method: String,
    #[serde(with = "access_time")]
    pub access_time: DateTime<Utc>,
}

impl AccessLogEvent {
    /// Decode a stream payload.
    ///
    /// A payload of JSON `null` decodes to `None`; anything that is not a
    /// well-formed event is an error.
    pub fn from_payload(payload: &str) -> Result<Option<Self>, serde_json::Error> {
        serde_json::from_str(payload)
    }

    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl NamedFields for AccessLogEvent {
    fn field(&self, name: &str) -> Option<FieldValue> {
        let value = match name {
            "userId" => FieldValue::Text(self.user_id.clone()),
            "ipAddress" => FieldValue::Text(self.ip_address.clone()),
            "userAgent" => FieldValue::Text(self.user_agent.clone()),
            "requestUrl" => FieldValue::Text(self.request_url.clone()),
            "method" => FieldValue::Text(self.method.clone()),
            "accessTime" => FieldValue::TimestampMicros(self.access_time.timestamp_micros()),
            _ => return None,
        };
        Some(value)
    }
}

/// An event read back from the store, with its surrogate id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAccessLog {
    pub id: i64,
    #[serde(flatten)]
    pub event: AccessLogEvent,
}

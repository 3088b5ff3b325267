use super::log::{Offsets, PartitionLog, RecordPosition, StreamError, StreamRecord};
use super::protocol::{
    CommitResponse, EndOffsetResponse, OffsetsBody, PublishRequest, RecordsResponse,
};
use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// HTTP client for a remote stream broker.
///
/// Each request goes to the first broker that answers; brokers that refuse
/// the connection or time out are skipped in favour of the next one.
#[derive(Debug)]
pub struct HttpLog {
    brokers: Vec<String>,
    client: reqwest::Client,
}

impl HttpLog {
    pub fn new(brokers: &[String], timeout: Duration) -> Result<Self, StreamError> {
        if brokers.is_empty() {
            return Err(StreamError::InvalidRequest(
                "at least one broker address is required".to_string(),
            ));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            brokers: brokers
                .iter()
                .map(|b| b.trim_end_matches('/').to_string())
                .collect(),
            client,
        })
    }

    pub fn brokers(&self) -> &[String] {
        &self.brokers
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, StreamError> {
        let mut last_error = None;

        for broker in &self.brokers {
            let url = format!("{}{}", broker, path);
            let mut request = self.client.request(method.clone(), &url);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    tracing::warn!(broker = %broker, error = %e, "Broker unreachable, trying next");
                    last_error = Some(e.to_string());
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let message = response
                    .json::<serde_json::Value>()
                    .await
                    .ok()
                    .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
                    .unwrap_or_default();
                return Err(StreamError::Broker { status, message });
            }

            return Ok(response.json().await?);
        }

        Err(StreamError::Unreachable(
            last_error.unwrap_or_else(|| "no brokers configured".to_string()),
        ))
    }
}

fn to_body<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, StreamError> {
    serde_json::to_value(value).map_err(|e| StreamError::InvalidRequest(e.to_string()))
}

#[async_trait]
impl PartitionLog for HttpLog {
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: String,
    ) -> Result<RecordPosition, StreamError> {
        let body = to_body(&PublishRequest {
            key: key.map(str::to_string),
            payload,
        })?;
        self.request(
            Method::POST,
            &format!("/stream/topics/{}/records", topic),
            Some(&body),
        )
        .await
    }

    async fn fetch(
        &self,
        topic: &str,
        partition: u32,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<StreamRecord>, StreamError> {
        let response: RecordsResponse = self
            .request(
                Method::GET,
                &format!(
                    "/stream/topics/{}/partitions/{}/records?offset={}&limit={}",
                    topic, partition, offset, limit
                ),
                None,
            )
            .await?;
        Ok(response.records)
    }

    async fn end_offset(&self, topic: &str, partition: u32) -> Result<u64, StreamError> {
        let response: EndOffsetResponse = self
            .request(
                Method::GET,
                &format!("/stream/topics/{}/partitions/{}/end", topic, partition),
                None,
            )
            .await?;
        Ok(response.offset)
    }

    async fn committed(&self, group: &str, topic: &str) -> Result<Offsets, StreamError> {
        let response: OffsetsBody = self
            .request(
                Method::GET,
                &format!("/stream/groups/{}/topics/{}/offsets", group, topic),
                None,
            )
            .await?;
        Ok(response.offsets)
    }

    async fn commit(&self, group: &str, topic: &str, offsets: &Offsets) -> Result<(), StreamError> {
        let body = to_body(&OffsetsBody {
            offsets: offsets.clone(),
        })?;
        let _: CommitResponse = self
            .request(
                Method::POST,
                &format!("/stream/groups/{}/topics/{}/offsets", group, topic),
                Some(&body),
            )
            .await?;
        Ok(())
    }
}

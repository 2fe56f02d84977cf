//! Concrete `EventSink` implementations (spec.md §4.6).

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};

use super::RequestMeta;

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, namespace: &str, events: &[Value], request_meta: &RequestMeta) -> Result<()>;
}

/// Mirrors events to the managed ingestion API, stamping `trackingId` and
/// stripping the solution-private `experimentConversions` key (the
/// conversion path processes it separately; see [`crate::variation`]).
pub struct ManagedTrackerSink {
    tracking_id: String,
    base_url: String,
    http: reqwest::Client,
}

impl ManagedTrackerSink {
    pub fn new(tracking_id: impl Into<String>, base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            tracking_id: tracking_id.into(),
            base_url: base_url.into(),
            http,
        }
    }
}

#[async_trait]
impl EventSink for ManagedTrackerSink {
    async fn send(&self, _namespace: &str, events: &[Value], _request_meta: &RequestMeta) -> Result<()> {
        let stripped: Vec<Value> = events
            .iter()
            .map(|event| {
                let mut event = event.clone();
                if let Some(obj) = event.as_object_mut() {
                    obj.remove("experimentConversions");
                }
                event
            })
            .collect();

        let response = self
            .http
            .post(format!("{}/events/put", self.base_url))
            .json(&serde_json::json!({
                "trackingId": self.tracking_id,
                "eventList": stripped,
            }))
            .send()
            .await
            .map_err(|e| Error::Downstream {
                code: "Transport".into(),
                message: e.to_string(),
            })?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::throttled("managed-tracker", "Throttling"));
        }
        if !response.status().is_success() {
            return Err(Error::Downstream {
                code: response.status().as_u16().to_string(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

fn envelope(namespace: &str, request_meta: &RequestMeta, event: &Value) -> Value {
    serde_json::json!({
        "namespace": namespace,
        "path": request_meta.path,
        "headers": request_meta.headers,
        "queryStringParameters": request_meta.query_string_parameters,
        "body": event,
    })
}

/// Sends one record per event whose partition key is the event's
/// `sessionId`.
pub struct StreamSink {
    stream_name: String,
    base_url: String,
    http: reqwest::Client,
}

impl StreamSink {
    pub fn new(stream_name: impl Into<String>, base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            stream_name: stream_name.into(),
            base_url: base_url.into(),
            http,
        }
    }
}

#[async_trait]
impl EventSink for StreamSink {
    async fn send(&self, namespace: &str, events: &[Value], request_meta: &RequestMeta) -> Result<()> {
        for event in events {
            let partition_key = event.get("sessionId").and_then(|v| v.as_str()).unwrap_or("");
            let record = envelope(namespace, request_meta, event);
            let response = self
                .http
                .post(format!("{}/streams/{}/record", self.base_url, self.stream_name))
                .json(&serde_json::json!({ "partitionKey": partition_key, "data": record }))
                .send()
                .await
                .map_err(|e| Error::Downstream {
                    code: "Transport".into(),
                    message: e.to_string(),
                })?;
            if !response.status().is_success() {
                return Err(Error::Downstream {
                    code: response.status().as_u16().to_string(),
                    message: response.text().await.unwrap_or_default(),
                });
            }
        }
        Ok(())
    }
}

/// Same envelope as [`StreamSink`] but without a partition key.
pub struct DeliveryStreamSink {
    stream_name: String,
    base_url: String,
    http: reqwest::Client,
}

impl DeliveryStreamSink {
    pub fn new(stream_name: impl Into<String>, base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            stream_name: stream_name.into(),
            base_url: base_url.into(),
            http,
        }
    }
}

#[async_trait]
impl EventSink for DeliveryStreamSink {
    async fn send(&self, namespace: &str, events: &[Value], request_meta: &RequestMeta) -> Result<()> {
        for event in events {
            let record = envelope(namespace, request_meta, event);
            let response = self
                .http
                .post(format!(
                    "{}/delivery-streams/{}/record",
                    self.base_url, self.stream_name
                ))
                .json(&serde_json::json!({ "data": record }))
                .send()
                .await
                .map_err(|e| Error::Downstream {
                    code: "Transport".into(),
                    message: e.to_string(),
                })?;
            if !response.status().is_success() {
                return Err(Error::Downstream {
                    code: response.status().as_u16().to_string(),
                    message: response.text().await.unwrap_or_default(),
                });
            }
        }
        Ok(())
    }
}

//! EventFanOut: mirrors ingested events to the namespace's configured event
//! targets (spec.md §4.6).

mod sinks;

pub use sinks::{DeliveryStreamSink, EventSink, ManagedTrackerSink, StreamSink};

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::background::BackgroundTaskGroup;
use crate::config::{EventTargetConfig, EventTargetKind};
use crate::context::ResolvedContext;
use crate::error::{Error, Result};

/// Request metadata carried into the stream/delivery-stream envelope.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub path: String,
    pub headers: HashMap<String, String>,
    pub query_string_parameters: HashMap<String, String>,
}

pub struct EventFanOut {
    http: reqwest::Client,
    managed_tracker_base_url: String,
    stream_base_url: String,
    delivery_stream_base_url: String,
}

impl EventFanOut {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base_urls(
            http,
            "http://localhost:9200",
            "http://localhost:9300",
            "http://localhost:9400",
        )
    }

    pub fn with_base_urls(
        http: reqwest::Client,
        managed_tracker_base_url: impl Into<String>,
        stream_base_url: impl Into<String>,
        delivery_stream_base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            managed_tracker_base_url: managed_tracker_base_url.into(),
            stream_base_url: stream_base_url.into(),
            delivery_stream_base_url: delivery_stream_base_url.into(),
        }
    }

    /// Stamps `sentAt` (epoch seconds) where absent, applies auto-context
    /// into each event's `properties`, then mirrors to every target. With
    /// one target, sends synchronously; with more than one, fans out over a
    /// joined pool and propagates any failure (spec.md §8, "Fan-out
    /// atomicity": sink failures downstream of a successful sink do not
    /// undo it).
    pub async fn fan_out(
        &self,
        namespace: &str,
        targets: &[EventTargetConfig],
        events: &mut Vec<Value>,
        auto_context: &ResolvedContext,
        request_meta: &RequestMeta,
    ) -> Result<()> {
        let now = now_epoch_seconds();
        for event in events.iter_mut() {
            if event.get("sentAt").is_none() {
                event["sentAt"] = Value::from(now);
            }
            apply_auto_context(event, auto_context);
        }

        let sinks: Vec<Arc<dyn EventSink>> = targets.iter().map(|t| self.build_sink(t)).collect();

        if sinks.len() <= 1 {
            if let Some(sink) = sinks.first() {
                sink.send(namespace, events, request_meta).await?;
            }
            return Ok(());
        }

        let mut handles = Vec::new();
        for sink in sinks {
            let namespace = namespace.to_string();
            let events = events.clone();
            let request_meta = request_meta.clone();
            handles.push(tokio::spawn(async move { sink.send(&namespace, &events, &request_meta).await }));
        }
        for handle in handles {
            handle.await.map_err(|e| Error::Internal(format!("event sink task panicked: {e}")))??;
        }
        Ok(())
    }

    /// Submits the fan-out as a request-scoped background task, matching
    /// the teacher's pattern of scheduling non-hot-path work onto the
    /// per-request group rather than awaiting it inline.
    #[allow(dead_code)]
    pub fn schedule(
        self: Arc<Self>,
        namespace: String,
        targets: Vec<EventTargetConfig>,
        mut events: Vec<Value>,
        auto_context: ResolvedContext,
        request_meta: RequestMeta,
        background: &mut BackgroundTaskGroup,
    ) {
        background.spawn(async move {
            self.fan_out(&namespace, &targets, &mut events, &auto_context, &request_meta).await
        });
    }

    fn build_sink(&self, target: &EventTargetConfig) -> Arc<dyn EventSink> {
        match target.kind {
            EventTargetKind::ManagedTracker => Arc::new(ManagedTrackerSink::new(
                target.tracking_id.clone().unwrap_or_default(),
                self.managed_tracker_base_url.clone(),
                self.http.clone(),
            )),
            EventTargetKind::Stream => Arc::new(StreamSink::new(
                target.name.clone().unwrap_or_default(),
                self.stream_base_url.clone(),
                self.http.clone(),
            )),
            EventTargetKind::DeliveryStream => Arc::new(DeliveryStreamSink::new(
                target.name.clone().unwrap_or_default(),
                self.delivery_stream_base_url.clone(),
                self.http.clone(),
            )),
        }
    }
}

/// Writes every resolved auto-context field into `event.properties` unless
/// the event already sets that key. Multi-value string-typed fields join
/// with `|`; otherwise the first value is used.
fn apply_auto_context(event: &mut Value, auto_context: &ResolvedContext) {
    if event.get("properties").is_none() {
        event["properties"] = Value::Object(serde_json::Map::new());
    }
    let properties = event["properties"].as_object_mut().expect("just ensured object");
    for (field, resolved) in auto_context {
        if properties.contains_key(field) {
            continue;
        }
        let value = if resolved.field_type.as_deref() == Some("string") && resolved.values.len() > 1 {
            resolved.values.join("|")
        } else {
            resolved.values.first().cloned().unwrap_or_default()
        };
        properties.insert(field.clone(), Value::String(value));
    }
}

fn now_epoch_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs() as i64
}

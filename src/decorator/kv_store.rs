//! KeyValueStoreDecorator: batches item-id lookups against a remote
//! key-value table (spec.md §4.5). Grounded on the bounded-concurrency
//! batching shape of the teacher's LLM batch-query pool (`Semaphore`-gated
//! workers, exponential backoff with a capped ceiling).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::error::{Error, Result};
use crate::metrics::Metrics;

use super::{index_positions_by_item_id, item_array_mut, MetadataDecorator};

const BATCH_CAP: usize = 50;
const MAX_CONCURRENT_CHUNKS: usize = 8;
const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_millis(1500);

pub struct KeyValueStoreDecorator {
    base_url: String,
    table_name: String,
    primary_key_field: String,
    http: reqwest::Client,
    metrics: Arc<dyn Metrics>,
}

impl KeyValueStoreDecorator {
    pub fn new(
        base_url: impl Into<String>,
        table_name: impl Into<String>,
        primary_key_field: impl Into<String>,
        http: reqwest::Client,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            table_name: table_name.into(),
            primary_key_field: primary_key_field.into(),
            http,
            metrics,
        }
    }

    /// Fetches metadata for every key in `keys`, partitioned into near-equal
    /// chunks (at most `BATCH_CAP` each) run over a bounded worker pool. Keys
    /// still unprocessed after `MAX_ATTEMPTS` retries are silently omitted.
    async fn batch_get(&self, keys: &[String]) -> Result<HashMap<String, Value>> {
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_CHUNKS));
        let mut handles = Vec::new();
        for chunk in keys.chunks(chunk_size(keys.len())) {
            let chunk = chunk.to_vec();
            let semaphore = semaphore.clone();
            let base_url = self.base_url.clone();
            let table_name = self.table_name.clone();
            let primary_key_field = self.primary_key_field.clone();
            let http = self.http.clone();
            let metrics = self.metrics.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                fetch_chunk_with_retry(&http, &base_url, &table_name, &primary_key_field, &chunk, &metrics).await
            }));
        }

        let mut results = HashMap::new();
        for handle in handles {
            let chunk_result = handle
                .await
                .map_err(|e| Error::Internal(format!("kv batch task panicked: {e}")))??;
            results.extend(chunk_result);
        }
        Ok(results)
    }
}

/// `chunk_size = ceil(n / ceil(n / BATCH_CAP))`: the smallest chunk count
/// that keeps every chunk at or under `BATCH_CAP`, spread near-equally
/// rather than a full `BATCH_CAP` followed by a small remainder.
fn chunk_size(n: usize) -> usize {
    if n == 0 {
        return BATCH_CAP;
    }
    let num_chunks = (n + BATCH_CAP - 1) / BATCH_CAP;
    (n + num_chunks - 1) / num_chunks
}

async fn fetch_chunk_with_retry(
    http: &reqwest::Client,
    base_url: &str,
    table_name: &str,
    primary_key_field: &str,
    keys: &[String],
    metrics: &Arc<dyn Metrics>,
) -> Result<HashMap<String, Value>> {
    let mut remaining: Vec<String> = keys.to_vec();
    let mut results = HashMap::new();
    let mut backoff = INITIAL_BACKOFF;

    for attempt in 1..=MAX_ATTEMPTS {
        if remaining.is_empty() {
            break;
        }
        match fetch_batch(http, base_url, table_name, primary_key_field, &remaining).await {
            Ok(batch) => {
                remaining.retain(|k| !batch.contains_key(k));
                results.extend(batch);
            }
            Err(FetchError::RateLimited) => {
                metrics.incr_counter("kv_store_decorator.rate_limited", &[("table", table_name)]);
                if attempt == MAX_ATTEMPTS {
                    return Err(Error::throttled("key-value-store", "RateLimited"));
                }
            }
            Err(FetchError::Other(message)) => {
                if attempt == MAX_ATTEMPTS {
                    return Err(Error::Downstream {
                        code: "KeyValueStoreError".into(),
                        message,
                    });
                }
            }
        }
        if attempt < MAX_ATTEMPTS && !remaining.is_empty() {
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
    if !remaining.is_empty() {
        tracing::warn!(count = remaining.len(), table = table_name, "keys unprocessed after max retries, omitting");
    }
    Ok(results)
}

enum FetchError {
    RateLimited,
    Other(String),
}

async fn fetch_batch(
    http: &reqwest::Client,
    base_url: &str,
    table_name: &str,
    primary_key_field: &str,
    keys: &[String],
) -> std::result::Result<HashMap<String, Value>, FetchError> {
    let response = http
        .post(format!("{base_url}/tables/{table_name}/batch-get"))
        .json(&serde_json::json!({ "primaryKeyField": primary_key_field, "keys": keys }))
        .send()
        .await
        .map_err(|e| FetchError::Other(e.to_string()))?;

    if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(FetchError::RateLimited);
    }
    if !response.status().is_success() {
        return Err(FetchError::Other(format!("batch-get returned {}", response.status())));
    }
    response
        .json::<HashMap<String, Value>>()
        .await
        .map_err(|e| FetchError::Other(e.to_string()))
}

#[async_trait]
impl MetadataDecorator for KeyValueStoreDecorator {
    async fn decorate(&self, response: &mut Value, _primary_key_field: &str) -> Result<()> {
        let Some(items) = item_array_mut(response) else {
            return Ok(());
        };
        let positions = index_positions_by_item_id(items);
        if positions.is_empty() {
            return Ok(());
        }
        let unique_keys: Vec<String> = positions.keys().cloned().collect();
        let metadata_by_key = self.batch_get(&unique_keys).await?;

        let items = item_array_mut(response).expect("checked above");
        for (item_id, value) in metadata_by_key {
            if let Some(positions) = positions.get(&item_id) {
                for &position in positions {
                    if let Some(item) = items.get_mut(position) {
                        item["metadata"] = value.clone();
                    }
                }
            }
        }
        Ok(())
    }
}

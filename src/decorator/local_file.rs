//! LocalIndexedFileDecorator: reads metadata from an on-disk indexed
//! key→JSON file, refreshed from object storage in the background
//! (spec.md §4.5). Grounded on the teacher's `memory/store.rs` shape — a
//! `Mutex`-guarded handle around a local store opened once and queried per
//! request.

use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

use super::{index_positions_by_item_id, item_array_mut, MetadataDecorator};

/// Shared, swappable handle to the parsed on-disk index. `prepare_datastores`
/// replaces the contents in place under the lock after a refresh completes.
struct Index {
    by_item_id: HashMap<String, Value>,
}

pub struct LocalIndexedFileDecorator {
    namespace: String,
    local_path: PathBuf,
    object_storage_bucket: String,
    http: reqwest::Client,
    index: Arc<Mutex<Option<Index>>>,
    last_refreshed_at: AtomicI64,
}

impl LocalIndexedFileDecorator {
    pub fn new(
        namespace: impl Into<String>,
        local_path: impl Into<PathBuf>,
        object_storage_bucket: impl Into<String>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            local_path: local_path.into(),
            object_storage_bucket: object_storage_bucket.into(),
            http,
            index: Arc::new(Mutex::new(None)),
            last_refreshed_at: AtomicI64::new(0),
        }
    }

    pub fn due_for_refresh(&self, refresh_interval_seconds: u64) -> bool {
        let now = now_secs();
        let last = self.last_refreshed_at.load(Ordering::Relaxed);
        now - last >= refresh_interval_seconds as i64
    }

    /// Downloads the compressed metadata file for this namespace from
    /// object storage, decompresses it to `local_path`, and swaps in the
    /// freshly parsed index. The previous index is simply dropped once the
    /// new one is in place (closing the prior one, per spec.md §4.5).
    pub async fn refresh_from_object_storage(&self) -> Result<()> {
        let key = format!("metadata/{}.json.gz", self.namespace);
        let response = self
            .http
            .get(format!("{}/{key}", self.object_storage_bucket))
            .send()
            .await
            .map_err(|e| Error::Downstream {
                code: "Transport".into(),
                message: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(Error::Downstream {
                code: response.status().as_u16().to_string(),
                message: format!("object storage fetch failed for {key}"),
            });
        }
        let compressed = response.bytes().await.map_err(Error::from)?;

        let local_path = self.local_path.clone();
        let decompressed = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| Error::Internal(format!("failed to decompress metadata file: {e}")))?;
            std::fs::write(&local_path, &out)
                .map_err(|e| Error::Internal(format!("failed to write metadata file: {e}")))?;
            Ok(out)
        })
        .await
        .map_err(|e| Error::Internal(format!("decompress task panicked: {e}")))??;

        let parsed: HashMap<String, Value> =
            serde_json::from_slice(&decompressed).map_err(Error::from)?;

        let mut guard = self.index.lock().await;
        *guard = Some(Index { by_item_id: parsed });
        drop(guard);
        self.last_refreshed_at.store(now_secs(), Ordering::Relaxed);
        Ok(())
    }

    async fn load_from_disk_if_absent(&self) -> Result<()> {
        {
            let guard = self.index.lock().await;
            if guard.is_some() {
                return Ok(());
            }
        }
        if !self.local_path.exists() {
            tracing::warn!(path = %self.local_path.display(), "local metadata file does not exist, returning unmodified responses");
            return Ok(());
        }
        let path = self.local_path.clone();
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::Internal(format!("failed to read metadata file: {e}")))?;
        let parsed: HashMap<String, Value> = serde_json::from_slice(&bytes).map_err(Error::from)?;
        let mut guard = self.index.lock().await;
        if guard.is_none() {
            *guard = Some(Index { by_item_id: parsed });
        }
        Ok(())
    }
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs() as i64
}

#[async_trait]
impl MetadataDecorator for LocalIndexedFileDecorator {
    async fn decorate(&self, response: &mut Value, _primary_key_field: &str) -> Result<()> {
        self.load_from_disk_if_absent().await?;
        let guard = self.index.lock().await;
        let Some(index) = guard.as_ref() else {
            return Ok(());
        };

        let Some(items) = item_array_mut(response) else {
            return Ok(());
        };
        let positions = index_positions_by_item_id(items);
        for (item_id, value) in &index.by_item_id {
            if let Some(positions) = positions.get(item_id) {
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


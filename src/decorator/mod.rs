//! MetadataDecorator and the process-wide DecoratorRegistry (spec.md §4.5).

mod kv_store;
mod local_file;

pub use kv_store::KeyValueStoreDecorator;
pub use local_file::LocalIndexedFileDecorator;

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::background::BackgroundTaskGroup;
use crate::config::InferenceItemMetadataConfig;
use crate::error::Result;

/// Enriches each item in `response.itemList` (or `.personalizedRanking`)
/// with a `metadata` field. Implementations must preserve item order and
/// issue at most one lookup per unique id (spec.md §8, "Decoration
/// order-preservation").
#[async_trait]
pub trait MetadataDecorator: Send + Sync {
    async fn decorate(&self, response: &mut Value, primary_key_field: &str) -> Result<()>;
}

fn item_array_mut(response: &mut Value) -> Option<&mut Vec<Value>> {
    response
        .get_mut("itemList")
        .or_else(|| response.get_mut("personalizedRanking"))
        .and_then(|v| v.as_array_mut())
}

/// Builds an `itemId -> [positions]` index over the response's item array,
/// so a decorator looks each unique id up once even when it repeats.
fn index_positions_by_item_id(items: &[Value]) -> HashMap<String, Vec<usize>> {
    let mut index: HashMap<String, Vec<usize>> = HashMap::new();
    for (position, item) in items.iter().enumerate() {
        if let Some(item_id) = item.get("itemId").and_then(|v| v.as_str()) {
            index.entry(item_id.to_string()).or_default().push(position);
        }
    }
    index
}

enum DecoratorKind {
    KeyValue(Arc<KeyValueStoreDecorator>),
    LocalFile(Arc<LocalIndexedFileDecorator>),
}

impl DecoratorKind {
    fn as_metadata_decorator(&self) -> Arc<dyn MetadataDecorator> {
        match self {
            DecoratorKind::KeyValue(d) => d.clone(),
            DecoratorKind::LocalFile(d) => d.clone(),
        }
    }
}

struct NamespaceEntry {
    config_type: String,
    kind: DecoratorKind,
}

/// Owns the namespace → decorator mapping; replacements are pointer-swaps
/// (spec.md §9, "Process-wide decorator registry").
pub struct DecoratorRegistry {
    instances: RwLock<HashMap<String, NamespaceEntry>>,
    last_prepared_at: AtomicI64,
    kv_factory: Box<dyn Fn(&str) -> KeyValueStoreDecorator + Send + Sync>,
    local_file_factory: Box<dyn Fn(&str) -> LocalIndexedFileDecorator + Send + Sync>,
}

const PREPARE_THROTTLE: Duration = Duration::from_secs(5);
const DEFAULT_REFRESH_INTERVAL_SECONDS: u64 = 300;

impl DecoratorRegistry {
    pub fn new(
        kv_factory: impl Fn(&str) -> KeyValueStoreDecorator + Send + Sync + 'static,
        local_file_factory: impl Fn(&str) -> LocalIndexedFileDecorator + Send + Sync + 'static,
    ) -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            last_prepared_at: AtomicI64::new(0),
            kv_factory: Box::new(kv_factory),
            local_file_factory: Box::new(local_file_factory),
        }
    }

    /// Lazily constructs the decorator for `namespace` on first use; returns
    /// `None` when `config` carries no `inferenceItemMetadata`.
    pub async fn get_instance(
        &self,
        namespace: &str,
        config: Option<&InferenceItemMetadataConfig>,
    ) -> Option<Arc<dyn MetadataDecorator>> {
        let config = config?;
        {
            let guard = self.instances.read().await;
            if let Some(entry) = guard.get(namespace) {
                if entry.config_type == config.decorator_type {
                    return Some(entry.kind.as_metadata_decorator());
                }
            }
        }
        let kind = match config.decorator_type.as_str() {
            "key-value-store" => DecoratorKind::KeyValue(Arc::new((self.kv_factory)(namespace))),
            "local-file" => DecoratorKind::LocalFile(Arc::new((self.local_file_factory)(namespace))),
            other => {
                tracing::warn!(decorator_type = other, "unrecognized inferenceItemMetadata type");
                return None;
            }
        };
        let decorator = kind.as_metadata_decorator();
        let mut guard = self.instances.write().await;
        guard.insert(
            namespace.to_string(),
            NamespaceEntry {
                config_type: config.decorator_type.clone(),
                kind,
            },
        );
        Some(decorator)
    }

    /// Throttled to run its expensive work at most once per 5 seconds
    /// globally; between runs it returns immediately.
    pub async fn prepare_datastores(
        &self,
        namespaces: &[(String, Option<InferenceItemMetadataConfig>)],
        background: &mut BackgroundTaskGroup,
    ) {
        let now = now_millis();
        let last = self.last_prepared_at.load(Ordering::Relaxed);
        if now - last < PREPARE_THROTTLE.as_millis() as i64 {
            return;
        }
        if self
            .last_prepared_at
            .compare_exchange(last, now, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        for (namespace, metadata) in namespaces {
            let Some(metadata) = metadata else { continue };
            match metadata.decorator_type.as_str() {
                "key-value-store" => {
                    self.get_instance(namespace, Some(metadata)).await;
                }
                "local-file" => {
                    let refresh_interval = metadata
                        .refresh_interval_seconds
                        .unwrap_or(DEFAULT_REFRESH_INTERVAL_SECONDS);
                    self.get_instance(namespace, Some(metadata)).await;
                    let handle = {
                        let guard = self.instances.read().await;
                        guard.get(namespace).and_then(|entry| match &entry.kind {
                            DecoratorKind::LocalFile(d) => Some(d.clone()),
                            _ => None,
                        })
                    };
                    if let Some(local_file) = handle {
                        if local_file.due_for_refresh(refresh_interval) {
                            let namespace = namespace.clone();
                            background.spawn(async move {
                                local_file.refresh_from_object_storage().await.map_err(|e| {
                                    tracing::warn!(namespace = %namespace, error = %e, "local-file metadata refresh failed");
                                    e
                                })
                            });
                        }
                    }
                }
                other => tracing::warn!(decorator_type = other, namespace = %namespace, "unrecognized decorator type"),
            }
        }
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as i64
}

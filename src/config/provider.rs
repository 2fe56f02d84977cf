//! ConfigProvider (spec.md §4.1): TTL-cached fetch of the live configuration
//! document from the config-distribution sidecar, with inheritance-resolved
//! lookups layered on top.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::error::{Error, Result};

use super::model::{
    ActionKind, ConfigDocument, EffectiveRecommenderConfig, Inheritable, NamespaceNode,
    RecommenderNode,
};

struct CachedConfig {
    document: Arc<ConfigDocument>,
    expires_at: Instant,
}

/// Fetches and caches the configuration document, exposing
/// inheritance-resolved lookups over the cached snapshot.
///
/// Readers only ever take a read lock on the hot path; the write lock is
/// only acquired when the TTL has expired and a fresh document is in hand
/// (pointer-swap style — see spec.md §5).
pub struct ConfigProvider {
    sidecar_url: String,
    http: reqwest::Client,
    cached: RwLock<Option<CachedConfig>>,
}

impl ConfigProvider {
    pub fn new(sidecar_url: impl Into<String>) -> Self {
        Self {
            sidecar_url: sidecar_url.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("failed to build config sidecar client"),
            cached: RwLock::new(None),
        }
    }

    /// Returns the cached document if its TTL has not expired; otherwise
    /// fetches a fresh one and replaces the cache. Falls back to the last
    /// known snapshot if the fetch fails, and only errors if there is no
    /// prior snapshot at all.
    pub async fn get_config(&self, max_age: Duration) -> Result<Arc<ConfigDocument>> {
        {
            let guard = self.cached.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached.expires_at > Instant::now() {
                    return Ok(cached.document.clone());
                }
            }
        }

        match self.fetch().await {
            Ok(document) => {
                let document = Arc::new(document);
                let mut guard = self.cached.write().await;
                *guard = Some(CachedConfig {
                    document: document.clone(),
                    expires_at: Instant::now() + max_age,
                });
                Ok(document)
            }
            Err(fetch_err) => {
                let guard = self.cached.read().await;
                match guard.as_ref() {
                    Some(cached) => Ok(cached.document.clone()),
                    None => Err(fetch_err),
                }
            }
        }
    }

    async fn fetch(&self) -> Result<ConfigDocument> {
        let response = self
            .http
            .get(&self.sidecar_url)
            .send()
            .await
            .map_err(|e| Error::Config(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::Config(format!(
                "config sidecar returned {}",
                response.status()
            )));
        }
        response
            .json::<ConfigDocument>()
            .await
            .map_err(|e| Error::Config(e.to_string()))
    }

    pub fn get_version(document: &ConfigDocument, default: &str) -> String {
        document.version.clone().unwrap_or_else(|| default.to_string())
    }

    /// Inheritance-resolved namespace view, or `None` if absent.
    pub fn get_namespace_config<'a>(
        document: &'a ConfigDocument,
        namespace: &str,
    ) -> Option<(&'a NamespaceNode, Inheritable)> {
        let ns = document.namespaces.get(namespace)?;
        let effective = ns.inherited.resolve(&document.inherited);
        Some((ns, effective))
    }

    /// Inheritance-resolved recommender view. If `action` is given, look
    /// only under that bucket; otherwise search all three action buckets in
    /// order and return the first match (spec.md §4.1).
    pub fn get_recommender_config(
        document: &ConfigDocument,
        namespace: &str,
        recommender: &str,
        action: Option<ActionKind>,
    ) -> Option<EffectiveRecommenderConfig> {
        let (ns, ns_effective) = Self::get_namespace_config(document, namespace)?;

        let actions: Vec<ActionKind> = match action {
            Some(a) => vec![a],
            None => ActionKind::ALL.to_vec(),
        };

        for candidate_action in &actions {
            if let Some(bucket) = ns.recommenders.get(candidate_action) {
                if let Some(node) = bucket.get(recommender) {
                    let effective = node.inherited.resolve(&ns_effective);
                    return Some(EffectiveRecommenderConfig {
                        namespace: namespace.to_string(),
                        recommender: recommender.to_string(),
                        action: *candidate_action,
                        node: node_without_inheritable(node),
                        effective,
                    });
                }
            }
        }
        None
    }
}

fn node_without_inheritable(node: &RecommenderNode) -> RecommenderNode {
    // The caller wants the resolved `effective` view for the four
    // inheritable keys and the node's own non-inheritable fields
    // (variations/experiments/post-processor); clone the whole node, the
    // `inherited` sub-struct is simply unused downstream once `effective`
    // has been computed.
    node.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::*;
    use std::collections::HashMap;

    fn doc_with_namespace() -> ConfigDocument {
        let mut variations = Vec::new();
        variations.push((
            "v1".to_string(),
            VariationNode {
                kind: VariationKind::Function,
                arn: None,
                endpoint_name: None,
                function_name: Some("fn1".into()),
                url_template: None,
                inherited: Inheritable::default(),
            },
        ));
        let mut recommenders = HashMap::new();
        let mut bucket = HashMap::new();
        bucket.insert(
            "rec1".to_string(),
            RecommenderNode {
                variations,
                experiments: vec![],
                response_post_processor: None,
                inherited: Inheritable::default(),
            },
        );
        recommenders.insert(ActionKind::RecommendItems, bucket);

        let ns = NamespaceNode {
            recommenders,
            event_targets: None,
            inherited: Inheritable::default(),
        };
        let mut namespaces = HashMap::new();
        namespaces.insert("ns1".to_string(), ns);

        ConfigDocument {
            version: Some("v42".into()),
            namespaces,
            inherited: Inheritable::default(),
        }
    }

    #[test]
    fn get_version_returns_root_version() {
        let doc = doc_with_namespace();
        assert_eq!(ConfigProvider::get_version(&doc, "default"), "v42");
    }

    #[test]
    fn get_version_falls_back_to_default() {
        let mut doc = doc_with_namespace();
        doc.version = None;
        assert_eq!(ConfigProvider::get_version(&doc, "default"), "default");
    }

    #[test]
    fn get_recommender_config_finds_by_explicit_action() {
        let doc = doc_with_namespace();
        let effective = ConfigProvider::get_recommender_config(
            &doc,
            "ns1",
            "rec1",
            Some(ActionKind::RecommendItems),
        )
        .unwrap();
        assert_eq!(effective.action, ActionKind::RecommendItems);
        assert!(effective.node.find_variation("v1").is_some());
    }

    #[test]
    fn get_recommender_config_searches_all_actions_when_none_given() {
        let doc = doc_with_namespace();
        let effective =
            ConfigProvider::get_recommender_config(&doc, "ns1", "rec1", None).unwrap();
        assert_eq!(effective.action, ActionKind::RecommendItems);
    }

    #[test]
    fn get_recommender_config_returns_none_when_absent() {
        let doc = doc_with_namespace();
        assert!(ConfigProvider::get_recommender_config(&doc, "ns1", "missing", None).is_none());
        assert!(ConfigProvider::get_recommender_config(&doc, "missing-ns", "rec1", None).is_none());
    }
}

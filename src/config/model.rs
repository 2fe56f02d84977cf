//! Configuration document shapes and inheritance resolution (spec.md §3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The three recognized recommender actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    RecommendItems,
    RelatedItems,
    RerankItems,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::RecommendItems => "recommend-items",
            ActionKind::RelatedItems => "related-items",
            ActionKind::RerankItems => "rerank-items",
        }
    }

    pub const ALL: [ActionKind; 3] = [
        ActionKind::RecommendItems,
        ActionKind::RelatedItems,
        ActionKind::RerankItems,
    ];
}

/// Per-tier cache directives (spec.md §6/§4.8).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheControlTier {
    #[serde(default, rename = "maxAge")]
    pub max_age: Option<u64>,
    #[serde(default)]
    pub directives: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheControlConfig {
    #[serde(default, rename = "userSpecified")]
    pub user_specified: Option<CacheControlTier>,
    #[serde(default, rename = "syntheticUserSpecified")]
    pub synthetic_user_specified: Option<CacheControlTier>,
    #[serde(default, rename = "noUserSpecified")]
    pub no_user_specified: Option<CacheControlTier>,
}

/// One `valueMappings` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueMapping {
    pub operator: String,
    pub value: String,
    #[serde(rename = "mapTo")]
    pub map_to: String,
}

/// One auto-context rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoContextRule {
    #[serde(rename = "type")]
    pub rule_type: String,
    /// Header name read by `header-value` rules; unused by the other rule
    /// types.
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default, rename = "valueMappings")]
    pub value_mappings: Option<Vec<ValueMapping>>,
}

/// One `autoContext` field descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoContextField {
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default, rename = "evaluateAll")]
    pub evaluate_all: bool,
    #[serde(default)]
    pub rules: Vec<AutoContextRule>,
}

pub type AutoContextConfig = HashMap<String, AutoContextField>;

/// One `filters` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterDescriptor {
    pub arn: String,
    #[serde(default)]
    pub condition: Option<String>,
}

pub type FiltersConfig = Vec<FilterDescriptor>;

/// `inferenceItemMetadata` decorator config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceItemMetadataConfig {
    #[serde(rename = "type")]
    pub decorator_type: String,
    #[serde(default, rename = "refreshIntervalSeconds")]
    pub refresh_interval_seconds: Option<u64>,
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

/// Fields inherited by shallow copy at every level (spec.md §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inheritable {
    #[serde(default, rename = "autoContext")]
    pub auto_context: Option<AutoContextConfig>,
    #[serde(default)]
    pub filters: Option<FiltersConfig>,
    #[serde(default, rename = "cacheControl")]
    pub cache_control: Option<CacheControlConfig>,
    #[serde(default, rename = "inferenceItemMetadata")]
    pub inference_item_metadata: Option<InferenceItemMetadataConfig>,
}

impl Inheritable {
    /// Produce the child's effective view: any key the child lacks falls
    /// back to the parent's; the stored tree is never mutated.
    pub fn resolve(&self, parent: &Inheritable) -> Inheritable {
        Inheritable {
            auto_context: self.auto_context.clone().or_else(|| parent.auto_context.clone()),
            filters: self.filters.clone().or_else(|| parent.filters.clone()),
            cache_control: self.cache_control.clone().or_else(|| parent.cache_control.clone()),
            inference_item_metadata: self
                .inference_item_metadata
                .clone()
                .or_else(|| parent.inference_item_metadata.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VariationKind {
    ManagedRecommender,
    ManagedCampaign,
    ModelEndpoint,
    Function,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariationNode {
    #[serde(rename = "type")]
    pub kind: VariationKind,
    /// arn for managed-recommender / managed-campaign variations.
    #[serde(default)]
    pub arn: Option<String>,
    /// endpoint name for model-endpoint variations.
    #[serde(default, rename = "endpointName")]
    pub endpoint_name: Option<String>,
    /// function name for function variations.
    #[serde(default, rename = "functionName")]
    pub function_name: Option<String>,
    /// URL template for http variations.
    #[serde(default, rename = "urlTemplate")]
    pub url_template: Option<String>,
    #[serde(flatten)]
    pub inherited: Inheritable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentMetric {
    pub name: String,
    #[serde(default = "default_true", rename = "trackExposures")]
    pub track_exposures: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Evaluation method; only "managed" (the external feature-flag
    /// evaluator) is recognized today.
    pub method: String,
    #[serde(default)]
    pub metrics: Vec<ExperimentMetric>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostProcessorConfig {
    #[serde(rename = "functionName")]
    pub function_name: String,
    #[serde(default, rename = "lookAheadMultiplier")]
    pub look_ahead_multiplier: Option<f64>,
    #[serde(default, rename = "lookAheadMaximumValue")]
    pub look_ahead_maximum_value: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommenderNode {
    /// Insertion-ordered variation map (plain Vec pairs: the teacher's stack
    /// has no `indexmap` dependency and nothing here needs more than
    /// ordered iteration + lookup-by-name).
    #[serde(default)]
    pub variations: Vec<(String, VariationNode)>,
    #[serde(default)]
    pub experiments: Vec<(String, ExperimentConfig)>,
    #[serde(default, rename = "responsePostProcessor")]
    pub response_post_processor: Option<PostProcessorConfig>,
    #[serde(flatten)]
    pub inherited: Inheritable,
}

impl RecommenderNode {
    pub fn find_variation(&self, name: &str) -> Option<&VariationNode> {
        self.variations.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn variation_at(&self, index: usize) -> Option<&VariationNode> {
        self.variations.get(index).map(|(_, v)| v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventTargetKind {
    ManagedTracker,
    Stream,
    DeliveryStream,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventTargetConfig {
    #[serde(rename = "type")]
    pub kind: EventTargetKind,
    /// Tracking id for managed-tracker targets.
    #[serde(default, rename = "trackingId")]
    pub tracking_id: Option<String>,
    /// Stream/delivery-stream name.
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamespaceNode {
    #[serde(default)]
    pub recommenders: HashMap<ActionKind, HashMap<String, RecommenderNode>>,
    #[serde(default, rename = "eventTargets")]
    pub event_targets: Option<Vec<EventTargetConfig>>,
    #[serde(flatten)]
    pub inherited: Inheritable,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub namespaces: HashMap<String, NamespaceNode>,
    #[serde(flatten)]
    pub inherited: Inheritable,
}

/// Inheritance-resolved view of a single (namespace, recommender, action).
/// Derived on read; the stored tree is never mutated.
#[derive(Debug, Clone)]
pub struct EffectiveRecommenderConfig {
    pub namespace: String,
    pub recommender: String,
    pub action: ActionKind,
    pub node: RecommenderNode,
    pub effective: Inheritable,
}

impl EffectiveRecommenderConfig {
    pub fn auto_context(&self) -> Option<&AutoContextConfig> {
        self.effective.auto_context.as_ref()
    }

    pub fn filters(&self) -> Option<&FiltersConfig> {
        self.effective.filters.as_ref()
    }

    pub fn cache_control(&self) -> Option<&CacheControlConfig> {
        self.effective.cache_control.as_ref()
    }

    pub fn inference_item_metadata(&self) -> Option<&InferenceItemMetadataConfig> {
        self.effective.inference_item_metadata.as_ref()
    }
}

/// Inheritance-resolved view of a variation (inherits from its recommender).
#[derive(Debug, Clone)]
pub struct EffectiveVariation {
    pub name: String,
    pub node: VariationNode,
    pub effective: Inheritable,
}

impl EffectiveVariation {
    pub fn cache_control(&self) -> Option<&CacheControlConfig> {
        self.effective.cache_control.as_ref()
    }

    pub fn inference_item_metadata(&self) -> Option<&InferenceItemMetadataConfig> {
        self.effective.inference_item_metadata.as_ref()
    }
}

/// Resolve a variation's effective inheritable fields against its owning
/// recommender's already-resolved view.
pub fn resolve_variation(
    recommender: &EffectiveRecommenderConfig,
    name: &str,
    node: &VariationNode,
) -> EffectiveVariation {
    EffectiveVariation {
        name: name.to_string(),
        node: node.clone(),
        effective: node.inherited.resolve(&recommender.effective),
    }
}

/// A generic item-list shaped response document, as returned by every
/// resolver backend (spec.md §4.4).
pub type ResponseDocument = Value;

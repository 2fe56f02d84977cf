//! Hierarchical configuration model with inheritance (spec.md §3, §4.1).

pub mod model;
pub mod provider;

pub use model::{
    ActionKind, AutoContextConfig, AutoContextField, AutoContextRule, CacheControlConfig,
    CacheControlTier, ConfigDocument, EffectiveRecommenderConfig, EffectiveVariation,
    EventTargetConfig, EventTargetKind, ExperimentConfig, ExperimentMetric, FilterDescriptor,
    FiltersConfig, InferenceItemMetadataConfig, Inheritable, NamespaceNode, PostProcessorConfig,
    RecommenderNode, ValueMapping, VariationKind, VariationNode, resolve_variation,
};
pub use provider::ConfigProvider;

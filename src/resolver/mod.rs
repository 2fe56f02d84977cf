//! Resolver interface and per-backend implementations (spec.md §4.4).

mod function;
mod http_resolver;
mod managed;
mod model_endpoint;

pub(crate) use function::invoke_function;
pub use function::FunctionResolver;
pub use http_resolver::HttpResolver;
pub use managed::ManagedRecommenderResolver;
pub use model_endpoint::ModelEndpointResolver;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{ActionKind, EffectiveRecommenderConfig, EffectiveVariation, ResponseDocument, VariationKind};
use crate::error::Result;

/// Fields shared by every resolver call (spec.md §4.4).
pub struct ResolveContext<'a> {
    pub action: ActionKind,
    pub recommender: &'a EffectiveRecommenderConfig,
    pub variation: &'a EffectiveVariation,
    pub num_results: u32,
    pub filter_arn: Option<String>,
    pub filter_values: Option<Value>,
    pub context: Option<Value>,
    pub include_metadata: bool,
}

#[async_trait]
pub trait Resolver: Send + Sync {
    async fn recommend_items(&self, ctx: &ResolveContext<'_>, user_id: &str) -> Result<ResponseDocument>;

    async fn related_items(
        &self,
        ctx: &ResolveContext<'_>,
        item_id: &str,
        user_id: Option<&str>,
    ) -> Result<ResponseDocument>;

    async fn rerank_items(
        &self,
        ctx: &ResolveContext<'_>,
        user_id: &str,
        item_list: &[String],
    ) -> Result<ResponseDocument>;
}

/// The `userId`/`itemId`/`itemList` subject carried on the outbound
/// invocation payload; each entry point supplies exactly one.
pub(crate) enum Subject<'a> {
    UserId(&'a str),
    ItemId { item_id: &'a str, user_id: Option<&'a str> },
    ItemList(&'a [String]),
}

pub(crate) fn build_payload(ctx: &ResolveContext<'_>, subject: Subject<'_>) -> Value {
    let mut body = serde_json::json!({
        "version": "1.0",
        "action": ctx.action.as_str(),
        "recommender": {
            "path": ctx.recommender.recommender,
            "config": ctx.recommender.node,
        },
        "variation": ctx.variation.node,
        "numResults": ctx.num_results,
    });
    let map = body.as_object_mut().expect("payload is always an object");
    match subject {
        Subject::UserId(user_id) => {
            map.insert("userId".into(), Value::String(user_id.to_string()));
        }
        Subject::ItemId { item_id, user_id } => {
            map.insert("itemId".into(), Value::String(item_id.to_string()));
            if let Some(user_id) = user_id {
                map.insert("userId".into(), Value::String(user_id.to_string()));
            }
        }
        Subject::ItemList(items) => {
            map.insert(
                "itemList".into(),
                Value::Array(items.iter().map(|i| Value::String(i.clone())).collect()),
            );
        }
    }
    if let Some(context) = &ctx.context {
        map.insert("context".into(), context.clone());
    }
    if let Some(filter_arn) = &ctx.filter_arn {
        map.insert("filterArn".into(), Value::String(filter_arn.clone()));
        if let Some(filter_values) = &ctx.filter_values {
            map.insert("filterValues".into(), filter_values.clone());
        }
    }
    body
}

/// Dispatches a variation to the resolver implementation for its type.
pub struct ResolverRegistry {
    managed: Arc<ManagedRecommenderResolver>,
    model_endpoint: Arc<ModelEndpointResolver>,
    function: Arc<FunctionResolver>,
    http: Arc<HttpResolver>,
}

impl ResolverRegistry {
    pub fn new(
        managed: ManagedRecommenderResolver,
        model_endpoint: ModelEndpointResolver,
        function: FunctionResolver,
        http: HttpResolver,
    ) -> Self {
        Self {
            managed: Arc::new(managed),
            model_endpoint: Arc::new(model_endpoint),
            function: Arc::new(function),
            http: Arc::new(http),
        }
    }

    pub fn get(&self, kind: VariationKind) -> Arc<dyn Resolver> {
        match kind {
            VariationKind::ManagedRecommender | VariationKind::ManagedCampaign => self.managed.clone(),
            VariationKind::ModelEndpoint => self.model_endpoint.clone(),
            VariationKind::Function => self.function.clone(),
            VariationKind::Http => self.http.clone(),
        }
    }
}

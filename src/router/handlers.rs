//! Axum handlers for the four HTTP entry points (spec.md §4.9, §4.10, §6).

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

use crate::background::BackgroundTaskGroup;
use crate::cache_header;
use crate::config::{ActionKind, ConfigProvider, VariationKind};
use crate::context::{self, HeaderBag};
use crate::error::{Error, Result};
use crate::events::RequestMeta;
use crate::gateway_env::CONFIG_TTL;
use crate::postprocess;
use crate::variation::{ConversionRequest, VariationSelector};

use super::query::RawQuery;
use super::state::AppState;

enum Subject {
    UserId(String),
    Related { item_id: String, user_id: Option<String> },
    Rerank { user_id: String, item_list: Vec<String> },
}

impl Subject {
    fn user_id_for_experiment(&self) -> Option<&str> {
        match self {
            Subject::UserId(u) => Some(u.as_str()),
            Subject::Related { user_id, .. } => user_id.as_deref(),
            Subject::Rerank { user_id, .. } => Some(user_id.as_str()),
        }
    }

    fn has_user(&self) -> bool {
        self.user_id_for_experiment().is_some()
    }

    fn payload_subject(&self) -> Value {
        match self {
            Subject::UserId(user_id) => serde_json::json!({ "userId": user_id }),
            Subject::Related { item_id, user_id } => {
                let mut v = serde_json::json!({ "itemId": item_id });
                if let Some(user_id) = user_id {
                    v["userId"] = Value::String(user_id.clone());
                }
                v
            }
            Subject::Rerank { user_id, .. } => serde_json::json!({ "userId": user_id }),
        }
    }
}

fn header_bag(headers: &HeaderMap) -> HeaderBag {
    let mut bag = HeaderBag::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            bag.insert(name.as_str(), value);
        }
    }
    bag
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as i64
}

/// Common 12-step sequence shared by all three GET inference endpoints and
/// the POST rerank-by-body endpoint (spec.md §4.9; resolves the §9 open
/// question about the POST handler's missing background-group argument by
/// unifying every entry point onto this one helper).
#[allow(clippy::too_many_arguments)]
async fn handle_inference_request(
    state: &AppState,
    action: ActionKind,
    namespace: &str,
    recommender_name: &str,
    subject: Subject,
    raw_query: RawQuery,
    headers: HeaderMap,
    uri: &Uri,
    is_get: bool,
) -> Result<Response> {
    let path_and_query = format!(
        "{}{}",
        uri.path(),
        uri.query().map(|q| format!("?{q}")).unwrap_or_default()
    );
    let now_ms = now_millis();

    if is_get {
        if let Some(if_none_match) = headers.get("if-none-match").and_then(|v| v.to_str().ok()) {
            if cache_header::is_not_modified(if_none_match, now_ms) {
                return Ok(StatusCode::NOT_MODIFIED.into_response());
            }
        }
    }

    let mut background = BackgroundTaskGroup::new();
    let query = raw_query.parse()?;

    let config = state.config_provider().get_config(CONFIG_TTL).await?;
    let recommender = ConfigProvider::get_recommender_config(&config, namespace, recommender_name, Some(action))
        .ok_or_else(|| Error::not_found(format!("recommender '{namespace}/{recommender_name}' not found")))?;

    state
        .decorators()
        .prepare_datastores(
            &[(namespace.to_string(), recommender.inference_item_metadata().cloned())],
            &mut background,
        )
        .await;

    let selector = VariationSelector::new(state.evaluator());
    let project = format!("{namespace}/{recommender_name}");
    let selection = selector
        .select(
            &recommender,
            &project,
            query.feature.as_deref(),
            subject.user_id_for_experiment(),
            &mut background,
        )
        .await?;

    let bag = header_bag(&headers);
    let now = chrono::Utc::now();
    let empty_auto_context = crate::config::AutoContextConfig::new();
    let auto_context = context::resolve(recommender.auto_context().unwrap_or(&empty_auto_context), &bag, now);

    let filter_arn = super::filters::resolve_filter_arn(
        query.filter.as_deref(),
        &state.env().region,
        recommender.filters(),
        subject.has_user(),
    );

    let inference_num_results = postprocess::inference_num_results(
        recommender.node.response_post_processor.as_ref(),
        query.num_results,
    );

    let resolve_ctx = crate::resolver::ResolveContext {
        action,
        recommender: &recommender,
        variation: &selection.variation,
        num_results: inference_num_results,
        filter_arn,
        filter_values: query.filter_values.clone(),
        context: context::merge_into(query.context.clone(), &auto_context),
        include_metadata: query.decorate_items,
    };

    let resolver = state.resolvers().get(selection.variation.node.kind);
    let mut response = match &subject {
        Subject::UserId(user_id) => resolver.recommend_items(&resolve_ctx, user_id).await?,
        Subject::Related { item_id, user_id } => {
            resolver.related_items(&resolve_ctx, item_id, user_id.as_deref()).await?
        }
        Subject::Rerank { user_id, item_list } => resolver.rerank_items(&resolve_ctx, user_id, item_list).await?,
    };

    let server_side_decorated = query.decorate_items
        && matches!(
            selection.variation.node.kind,
            VariationKind::ManagedRecommender | VariationKind::ManagedCampaign
        )
        && selection
            .variation
            .inference_item_metadata()
            .map(|m| m.decorator_type == "managed")
            .unwrap_or(false);

    if query.decorate_items && !server_side_decorated {
        if let Some(decorator) = state
            .decorators()
            .get_instance(namespace, selection.variation.inference_item_metadata())
            .await
        {
            decorator
                .decorate(&mut response, &state.env().metadata_primary_key)
                .await?;
        }
    }

    if let Some(experiment) = &selection.matched_experiment {
        response["matchedExperiment"] = serde_json::json!({ "feature": experiment });
    }

    if let Some(post_processor) = &recommender.node.response_post_processor {
        response = state
            .post_processor()
            .process(
                post_processor,
                action,
                &recommender,
                &selection.variation,
                subject.payload_subject(),
                response,
                query.num_results,
            )
            .await?;
    }

    let tier = cache_header::choose_tier(subject.has_user(), query.synthetic_user);
    let cache_headers = cache_header::compose_headers(
        selection.variation.cache_control(),
        tier,
        &path_and_query,
        now_ms,
    );

    let version = ConfigProvider::get_version(&config, "unknown");

    background.join().await?;

    let mut builder = axum::http::Response::builder()
        .status(StatusCode::OK)
        .header("X-Personalization-Config-Version", version);
    if is_get {
        if let Some(etag) = cache_headers.etag {
            builder = builder.header("ETag", etag);
        }
        if let Some(cache_control) = cache_headers.cache_control {
            builder = builder.header("Cache-Control", cache_control);
        }
    } else {
        builder = builder.header("Cache-Control", "no-store");
    }

    Ok(builder
        .header("Content-Type", "application/json")
        .body(axum::body::Body::from(serde_json::to_vec(&response)?))
        .expect("response builder invariants upheld"))
}

pub async fn recommend_items(
    State(state): State<AppState>,
    Path((ns, rec, user_id)): Path<(String, String, String)>,
    Query(query): Query<RawQuery>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response> {
    handle_inference_request(
        &state,
        ActionKind::RecommendItems,
        &ns,
        &rec,
        Subject::UserId(user_id),
        query,
        headers,
        &uri,
        true,
    )
    .await
}

pub async fn related_items(
    State(state): State<AppState>,
    Path((ns, rec, item_id)): Path<(String, String, String)>,
    Query(query): Query<RawQuery>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response> {
    let user_id = query.user_id.clone();
    handle_inference_request(
        &state,
        ActionKind::RelatedItems,
        &ns,
        &rec,
        Subject::Related { item_id, user_id },
        query,
        headers,
        &uri,
        true,
    )
    .await
}

pub async fn rerank_items_path(
    State(state): State<AppState>,
    Path((ns, rec, user_id, item_ids)): Path<(String, String, String, String)>,
    Query(query): Query<RawQuery>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response> {
    let item_list: Vec<String> = item_ids.split(',').map(|s| s.to_string()).collect();
    handle_inference_request(
        &state,
        ActionKind::RerankItems,
        &ns,
        &rec,
        Subject::Rerank { user_id, item_list },
        query,
        headers,
        &uri,
        true,
    )
    .await
}

pub async fn rerank_items_body(
    State(state): State<AppState>,
    Path((ns, rec, user_id)): Path<(String, String, String)>,
    Query(query): Query<RawQuery>,
    uri: Uri,
    headers: HeaderMap,
    Json(item_list): Json<Vec<String>>,
) -> Result<Response> {
    handle_inference_request(
        &state,
        ActionKind::RerankItems,
        &ns,
        &rec,
        Subject::Rerank { user_id, item_list },
        query,
        headers,
        &uri,
        false,
    )
    .await
}

#[derive(serde::Deserialize)]
pub struct EventsRequestBody {
    #[serde(rename = "eventList")]
    event_list: Vec<Value>,
    #[serde(default, rename = "experimentConversions")]
    experiment_conversions: Vec<ConversionRequest>,
}

pub async fn events(
    State(state): State<AppState>,
    Path(ns): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    Query(query_string_parameters): Query<std::collections::HashMap<String, String>>,
    Json(body): Json<EventsRequestBody>,
) -> Result<Response> {
    let config = state.config_provider().get_config(CONFIG_TTL).await?;
    let (namespace_node, ns_effective) = ConfigProvider::get_namespace_config(&config, &ns)
        .ok_or_else(|| Error::not_found(format!("namespace '{ns}' not found")))?;
    let targets = namespace_node
        .event_targets
        .as_ref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::not_found(format!("namespace '{ns}' has no eventTargets configured")))?;

    let bag = header_bag(&headers);
    let now = chrono::Utc::now();
    let empty_auto_context = crate::config::AutoContextConfig::new();
    let auto_context = context::resolve(
        ns_effective.auto_context.as_ref().unwrap_or(&empty_auto_context),
        &bag,
        now,
    );

    let request_meta = RequestMeta {
        path: uri.path().to_string(),
        headers: headers
            .iter()
            .filter_map(|(n, v)| v.to_str().ok().map(|v| (n.as_str().to_string(), v.to_string())))
            .collect(),
        query_string_parameters,
    };

    let mut event_list = body.event_list;
    state
        .event_fan_out()
        .fan_out(&ns, targets, &mut event_list, &auto_context, &request_meta)
        .await?;

    if !body.experiment_conversions.is_empty() {
        let selector = VariationSelector::new(state.evaluator());
        selector
            .record_conversions(&config, &ns, &ns, &body.experiment_conversions)
            .await?;
    }

    Ok(axum::http::Response::builder()
        .status(StatusCode::OK)
        .header("Cache-Control", "no-store")
        .header("Content-Type", "application/json")
        .body(axum::body::Body::from(serde_json::to_vec(&serde_json::json!({ "eventList": event_list }))?))
        .expect("response builder invariants upheld"))
}

//! ManagedRecommenderResolver: dispatches to the managed recommendation
//! service, used for both `managed-recommender` and `managed-campaign`
//! variations (spec.md §4.4).

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::metrics::Metrics;

use super::{build_payload, ResolveContext, Resolver, Subject};

const MAX_NUM_RESULTS: u32 = 500;

pub struct ManagedRecommenderResolver {
    base_url: String,
    http: reqwest::Client,
    metrics: std::sync::Arc<dyn Metrics>,
}

impl ManagedRecommenderResolver {
    pub fn new(base_url: impl Into<String>, http: reqwest::Client, metrics: std::sync::Arc<dyn Metrics>) -> Self {
        Self {
            base_url: base_url.into(),
            http,
            metrics,
        }
    }

    async fn invoke(&self, ctx: &ResolveContext<'_>, subject: Subject<'_>) -> Result<Value> {
        let arn = ctx
            .variation
            .node
            .arn
            .as_deref()
            .ok_or_else(|| Error::configuration("managed variation missing arn"))?;
        let param_name = arn_param_name(arn)?;

        let mut body = build_payload(ctx, subject);
        body["numResults"] = Value::from(ctx.num_results.min(MAX_NUM_RESULTS));
        body.as_object_mut()
            .expect("payload is always an object")
            .insert(param_name.to_string(), Value::String(arn.to_string()));

        if ctx.include_metadata {
            if let Some(meta) = ctx.variation.inference_item_metadata() {
                if meta.decorator_type == "managed" {
                    if let Some(columns) = &meta.columns {
                        body["metadataColumns"] = Value::from(columns.clone());
                    }
                }
            }
        }

        let response = self
            .http
            .post(format!("{}/{param_name}s", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Downstream {
                code: "Transport".into(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return response.json::<Value>().await.map_err(Error::from);
        }

        let code = response
            .headers()
            .get("x-amzn-errortype")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("UnknownError")
            .to_string();
        let message = response.text().await.unwrap_or_default();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || code.contains("Throttling") {
            self.metrics.incr_counter("managed_resolver.throttled", &[("arn", arn)]);
            return Err(Error::managed_service("Throttling", message));
        }
        Err(Error::managed_service(code, message))
    }
}

fn arn_param_name(arn: &str) -> Result<&'static str> {
    for segment in arn.split(|c| c == '/' || c == ':') {
        if segment == "recommender" {
            return Ok("recommenderArn");
        }
        if segment == "campaign" {
            return Ok("campaignArn");
        }
    }
    Err(Error::configuration(format!(
        "could not determine resource type from arn '{arn}'"
    )))
}

#[async_trait]
impl Resolver for ManagedRecommenderResolver {
    async fn recommend_items(&self, ctx: &ResolveContext<'_>, user_id: &str) -> Result<Value> {
        self.invoke(ctx, Subject::UserId(user_id)).await
    }

    async fn related_items(&self, ctx: &ResolveContext<'_>, item_id: &str, user_id: Option<&str>) -> Result<Value> {
        self.invoke(ctx, Subject::ItemId { item_id, user_id }).await
    }

    async fn rerank_items(&self, ctx: &ResolveContext<'_>, _user_id: &str, item_list: &[String]) -> Result<Value> {
        self.invoke(ctx, Subject::ItemList(item_list)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arn_param_name_recognizes_recommender() {
        assert_eq!(
            arn_param_name("arn:aws:personalize:us-east-1:123:recommender/my-rec").unwrap(),
            "recommenderArn"
        );
    }

    #[test]
    fn arn_param_name_recognizes_campaign() {
        assert_eq!(
            arn_param_name("arn:aws:personalize:us-east-1:123:campaign/my-campaign").unwrap(),
            "campaignArn"
        );
    }

    #[test]
    fn arn_param_name_rejects_unknown_resource() {
        assert!(arn_param_name("arn:aws:personalize:us-east-1:123:dataset/d").is_err());
    }
}

//! ModelEndpointResolver: posts the invocation payload to a named model
//! endpoint and returns its JSON body verbatim (spec.md §4.4).

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};

use super::{build_payload, ResolveContext, Resolver, Subject};

pub struct ModelEndpointResolver {
    http: reqwest::Client,
}

impl ModelEndpointResolver {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn invoke(&self, ctx: &ResolveContext<'_>, subject: Subject<'_>) -> Result<Value> {
        let endpoint = ctx
            .variation
            .node
            .endpoint_name
            .as_deref()
            .ok_or_else(|| Error::configuration("model-endpoint variation missing endpointName"))?;
        let body = build_payload(ctx, subject);
        let response = self
            .http
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Downstream {
                code: "Transport".into(),
                message: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(Error::Downstream {
                code: response.status().as_u16().to_string(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        response.json::<Value>().await.map_err(Error::from)
    }
}

#[async_trait]
impl Resolver for ModelEndpointResolver {
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

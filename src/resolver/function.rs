//! FunctionResolver: invokes a named function endpoint synchronously with
//! the same payload shape as the model-endpoint resolver (spec.md §4.4).
//! Also reused by [`crate::postprocess::ResponsePostProcessor`], which
//! invokes response-post-processor functions the same way.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};

use super::{build_payload, ResolveContext, Resolver, Subject};

pub struct FunctionResolver {
    http: reqwest::Client,
}

impl FunctionResolver {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn invoke(&self, ctx: &ResolveContext<'_>, subject: Subject<'_>) -> Result<Value> {
        let function_name = ctx
            .variation
            .node
            .function_name
            .as_deref()
            .ok_or_else(|| Error::configuration("function variation missing functionName"))?;
        let body = build_payload(ctx, subject);
        invoke_function(&self.http, function_name, &body).await
    }
}

/// Shared HTTP-function-call helper: POSTs `payload` to `function_name` and
/// fails with `FunctionInvoke` on any non-200 status.
pub(crate) async fn invoke_function(http: &reqwest::Client, function_name: &str, payload: &Value) -> Result<Value> {
    let response = http
        .post(function_name)
        .json(payload)
        .send()
        .await
        .map_err(|e| Error::FunctionInvoke {
            status: 0,
            message: e.to_string(),
        })?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::FunctionInvoke {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        });
    }
    response.json::<Value>().await.map_err(Error::from)
}

#[async_trait]
impl Resolver for FunctionResolver {
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

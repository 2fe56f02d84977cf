//! HttpResolver: expands a URL template with request parameters, issues a
//! GET, and parses the JSON response (spec.md §4.4).

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};

use super::{ResolveContext, Resolver, Subject};

pub struct HttpResolver {
    http: reqwest::Client,
}

impl HttpResolver {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn invoke(&self, ctx: &ResolveContext<'_>, subject: Subject<'_>) -> Result<Value> {
        let template = ctx
            .variation
            .node
            .url_template
            .as_deref()
            .ok_or_else(|| Error::configuration("http variation missing urlTemplate"))?;
        let url = expand_template(template, ctx, &subject);
        let response = self
            .http
            .get(&url)
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

fn expand_template(template: &str, ctx: &ResolveContext<'_>, subject: &Subject<'_>) -> String {
    let mut params: HashMap<&str, String> = HashMap::new();
    params.insert("numResults", ctx.num_results.to_string());
    match subject {
        Subject::UserId(user_id) => {
            params.insert("userId", user_id.to_string());
        }
        Subject::ItemId { item_id, user_id } => {
            params.insert("itemId", item_id.to_string());
            if let Some(user_id) = user_id {
                params.insert("userId", user_id.to_string());
            }
        }
        Subject::ItemList(items) => {
            params.insert("itemList", items.join(","));
        }
    }

    let mut out = template.to_string();
    for (key, value) in &params {
        out = out.replace(&format!("{{{key}}}"), &urlencoding_encode(value));
    }
    out
}

fn urlencoding_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b',' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[async_trait]
impl Resolver for HttpResolver {
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

//! ResponsePostProcessor (spec.md §4.7): optional look-ahead + response
//! rewriting step invoked after a resolver call, reusing the same
//! HTTP-function-call helper as `FunctionResolver`.

use serde_json::Value;

use crate::config::{ActionKind, EffectiveRecommenderConfig, EffectiveVariation, PostProcessorConfig};
use crate::error::Result;
use crate::resolver::invoke_function;

/// Computes the inference-time result count to request from the resolver,
/// applying `lookAheadMultiplier` and clamping by `lookAheadMaximumValue`
/// when configured.
pub fn inference_num_results(post_processor: Option<&PostProcessorConfig>, caller_num_results: u32) -> u32 {
    let Some(post_processor) = post_processor else {
        return caller_num_results;
    };
    let Some(multiplier) = post_processor.look_ahead_multiplier else {
        return caller_num_results;
    };
    let scaled = (caller_num_results as f64 * multiplier).round() as u32;
    match post_processor.look_ahead_maximum_value {
        Some(max) => scaled.min(max),
        None => scaled,
    }
}

pub struct ResponsePostProcessor {
    http: reqwest::Client,
}

impl ResponsePostProcessor {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Invokes the configured post-processor function, then truncates
    /// whichever of `itemList`/`personalizedRanking` is present back to
    /// `caller_num_results` (spec.md §9 open question (a): the source
    /// truncates `itemList` unconditionally, which silently no-ops for
    /// `personalizedRanking`-shaped responses; here both keys are checked).
    pub async fn process(
        &self,
        post_processor: &PostProcessorConfig,
        action: ActionKind,
        recommender: &EffectiveRecommenderConfig,
        variation: &EffectiveVariation,
        subject: Value,
        mut response: Value,
        caller_num_results: u32,
    ) -> Result<Value> {
        let payload = serde_json::json!({
            "version": "1.0",
            "action": action.as_str(),
            "recommender": { "path": recommender.recommender, "config": recommender.node },
            "variation": variation.node,
            "response": response,
        });
        let payload = merge_subject(payload, subject);

        response = invoke_function(&self.http, &post_processor.function_name, &payload).await?;
        truncate_items(&mut response, caller_num_results);
        Ok(response)
    }
}

fn merge_subject(mut payload: Value, subject: Value) -> Value {
    if let (Some(payload_obj), Some(subject_obj)) = (payload.as_object_mut(), subject.as_object()) {
        for (key, value) in subject_obj {
            payload_obj.insert(key.clone(), value.clone());
        }
    }
    payload
}

fn truncate_items(response: &mut Value, caller_num_results: u32) {
    for key in ["itemList", "personalizedRanking"] {
        if let Some(array) = response.get_mut(key).and_then(|v| v.as_array_mut()) {
            array.truncate(caller_num_results as usize);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_post_processor_returns_caller_value_unchanged() {
        assert_eq!(inference_num_results(None, 10), 10);
    }

    #[test]
    fn multiplier_scales_and_clamps() {
        let config = PostProcessorConfig {
            function_name: "fn".into(),
            look_ahead_multiplier: Some(3.0),
            look_ahead_maximum_value: Some(20),
        };
        assert_eq!(inference_num_results(Some(&config), 10), 20);
    }

    #[test]
    fn multiplier_without_cap_scales_freely() {
        let config = PostProcessorConfig {
            function_name: "fn".into(),
            look_ahead_multiplier: Some(2.0),
            look_ahead_maximum_value: None,
        };
        assert_eq!(inference_num_results(Some(&config), 10), 20);
    }

    #[test]
    fn truncate_handles_either_key() {
        let mut response = serde_json::json!({ "personalizedRanking": [1, 2, 3, 4, 5] });
        truncate_items(&mut response, 2);
        assert_eq!(response["personalizedRanking"].as_array().unwrap().len(), 2);

        let mut response = serde_json::json!({ "itemList": [1, 2, 3, 4, 5] });
        truncate_items(&mut response, 3);
        assert_eq!(response["itemList"].as_array().unwrap().len(), 3);
    }
}

//! The managed feature-flag/experiment evaluator client (spec.md §4.3).

use async_trait::async_trait;

/// Outcome of an `evaluate` call: the resolved variation reference plus
/// whether the evaluator matched an experiment rule (vs. a default/control
/// decision that carries no exposure obligation).
#[derive(Debug, Clone)]
pub struct EvaluatorDecision {
    /// Either a variation name or a numeric index, as a string.
    pub target: String,
    pub matched_experiment_rule: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum EvaluatorError {
    /// The project or feature is not configured in the evaluator; callers
    /// treat this as "fall back to the first variation", not a hard error.
    #[error("evaluator project/feature not found")]
    NotFound,
    #[error("evaluator transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait ExperimentEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        project: &str,
        feature: &str,
        user_id: &str,
    ) -> Result<EvaluatorDecision, EvaluatorError>;

    async fn record_exposure(&self, feature: &str, user_id: &str, metric: &str) -> Result<(), EvaluatorError>;

    async fn record_conversion(
        &self,
        project: &str,
        feature: &str,
        user_id: &str,
        metric: &str,
    ) -> Result<(), EvaluatorError>;
}

/// Talks to the managed feature-flag/experiment service over HTTP.
pub struct ManagedFeatureEvaluator {
    base_url: String,
    http: reqwest::Client,
}

impl ManagedFeatureEvaluator {
    pub fn new(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            http,
        }
    }
}

#[derive(serde::Deserialize)]
struct EvaluateResponse {
    #[serde(rename = "variation")]
    target: String,
    reason: String,
}

#[async_trait]
impl ExperimentEvaluator for ManagedFeatureEvaluator {
    async fn evaluate(
        &self,
        project: &str,
        feature: &str,
        user_id: &str,
    ) -> Result<EvaluatorDecision, EvaluatorError> {
        let response = self
            .http
            .get(format!("{}/projects/{project}/features/{feature}/evaluate", self.base_url))
            .query(&[("userId", user_id)])
            .send()
            .await
            .map_err(|e| EvaluatorError::Transport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(EvaluatorError::NotFound);
        }
        if !response.status().is_success() {
            return Err(EvaluatorError::Transport(format!(
                "evaluator returned {}",
                response.status()
            )));
        }
        let body: EvaluateResponse = response
            .json()
            .await
            .map_err(|e| EvaluatorError::Transport(e.to_string()))?;
        Ok(EvaluatorDecision {
            target: body.target,
            matched_experiment_rule: body.reason == "EXPERIMENT_RULE_MATCH",
        })
    }

    async fn record_exposure(&self, feature: &str, user_id: &str, metric: &str) -> Result<(), EvaluatorError> {
        let response = self
            .http
            .post(format!("{}/events/exposure", self.base_url))
            .json(&serde_json::json!({
                "feature": feature,
                "userId": user_id,
                "metric": metric,
            }))
            .send()
            .await
            .map_err(|e| EvaluatorError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(EvaluatorError::Transport(format!(
                "evaluator exposure recording returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn record_conversion(
        &self,
        project: &str,
        feature: &str,
        user_id: &str,
        metric: &str,
    ) -> Result<(), EvaluatorError> {
        let response = self
            .http
            .post(format!("{}/projects/{project}/events/conversion", self.base_url))
            .json(&serde_json::json!({
                "feature": feature,
                "userId": user_id,
                "metric": metric,
            }))
            .send()
            .await
            .map_err(|e| EvaluatorError::Transport(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(EvaluatorError::NotFound);
        }
        if !response.status().is_success() {
            return Err(EvaluatorError::Transport(format!(
                "evaluator conversion recording returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Always reports `NotFound`; used in tests that should never reach the
/// experiment-evaluation branch, and as the default when no evaluator is
/// configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEvaluator;

#[async_trait]
impl ExperimentEvaluator for NullEvaluator {
    async fn evaluate(&self, _project: &str, _feature: &str, _user_id: &str) -> Result<EvaluatorDecision, EvaluatorError> {
        Err(EvaluatorError::NotFound)
    }

    async fn record_exposure(&self, _feature: &str, _user_id: &str, _metric: &str) -> Result<(), EvaluatorError> {
        Ok(())
    }

    async fn record_conversion(
        &self,
        _project: &str,
        _feature: &str,
        _user_id: &str,
        _metric: &str,
    ) -> Result<(), EvaluatorError> {
        Ok(())
    }
}

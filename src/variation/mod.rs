//! VariationSelector & ExperimentEvaluator (spec.md §4.3).

mod evaluator;

pub use evaluator::{EvaluatorDecision, EvaluatorError, ExperimentEvaluator, ManagedFeatureEvaluator, NullEvaluator};

use std::sync::Arc;

use crate::background::BackgroundTaskGroup;
use crate::config::{resolve_variation, EffectiveRecommenderConfig, EffectiveVariation, ExperimentConfig};
use crate::error::{Error, Result};

/// Result of selecting a variation: the resolved variation plus the matched
/// experiment name, if any.
pub struct Selection {
    pub variation: EffectiveVariation,
    pub matched_experiment: Option<String>,
}

/// Chooses a variation for `recommender`, consulting `evaluator` when an
/// experiment applies, and scheduling exposure events on `background`.
pub struct VariationSelector {
    evaluator: Arc<dyn ExperimentEvaluator>,
}

impl VariationSelector {
    pub fn new(evaluator: Arc<dyn ExperimentEvaluator>) -> Self {
        Self { evaluator }
    }

    pub async fn select(
        &self,
        recommender: &EffectiveRecommenderConfig,
        project: &str,
        feature: Option<&str>,
        user_id: Option<&str>,
        background: &mut BackgroundTaskGroup,
    ) -> Result<Selection> {
        let node = &recommender.node;
        if node.variations.is_empty() {
            return Err(Error::NoVariationsConfigured);
        }

        if node.experiments.is_empty() || node.variations.len() == 1 || user_id.is_none() {
            let (name, variation_node) = &node.variations[0];
            return Ok(Selection {
                variation: resolve_variation(recommender, name, variation_node),
                matched_experiment: None,
            });
        }
        let user_id = user_id.expect("checked above");

        let (experiment_name, experiment) = match feature {
            Some(f) => node
                .experiments
                .iter()
                .find(|(n, _)| n == f)
                .ok_or_else(|| Error::not_found(format!("unknown experiment feature '{f}'")))?,
            None => &node.experiments[0],
        };

        if experiment.method != "managed" {
            return Err(Error::configuration(format!(
                "unsupported experiment method '{}'",
                experiment.method
            )));
        }

        match self.evaluator.evaluate(project, experiment_name, user_id).await {
            Ok(decision) => {
                let (name, variation_node) = locate_variation(node, &decision.target)?;
                let variation = resolve_variation(recommender, name, variation_node);
                if decision.matched_experiment_rule {
                    schedule_exposure_events(self.evaluator.clone(), project, experiment_name, experiment, user_id, background);
                }
                Ok(Selection {
                    variation,
                    matched_experiment: Some(experiment_name.clone()),
                })
            }
            Err(EvaluatorError::NotFound) => {
                let (name, variation_node) = &node.variations[0];
                Ok(Selection {
                    variation: resolve_variation(recommender, name, variation_node),
                    matched_experiment: None,
                })
            }
            Err(EvaluatorError::Transport(message)) => Err(Error::Downstream {
                code: "EvaluatorUnavailable".into(),
                message,
            }),
        }
    }

    /// Conversion path, invoked from event ingestion when the event body
    /// carries `experimentConversions` (spec.md §4.3, §4.10). Each
    /// conversion names its own recommender, resolved against `document`
    /// within `namespace`; validation errors (unknown recommender/experiment)
    /// surface as 400, configuration gaps as 500.
    pub async fn record_conversions(
        &self,
        document: &crate::config::ConfigDocument,
        namespace: &str,
        project: &str,
        conversions: &[ConversionRequest],
    ) -> Result<()> {
        for conversion in conversions {
            let recommender = crate::config::ConfigProvider::get_recommender_config(
                document,
                namespace,
                &conversion.recommender,
                None,
            )
            .ok_or_else(|| {
                Error::validation(format!("unknown recommender '{}' in conversion", conversion.recommender))
            })?;
            let (experiment_name, _experiment) = recommender
                .node
                .experiments
                .iter()
                .find(|(n, _)| n == &conversion.experiment)
                .ok_or_else(|| {
                    Error::validation(format!("unknown experiment '{}' in conversion", conversion.experiment))
                })?;
            self.evaluator
                .record_conversion(project, experiment_name, &conversion.user_id, &conversion.metric)
                .await
                .map_err(|e| match e {
                    EvaluatorError::NotFound => Error::configuration(format!(
                        "conversion target '{}' not configured in evaluator project",
                        experiment_name
                    )),
                    EvaluatorError::Transport(message) => Error::Downstream {
                        code: "EvaluatorUnavailable".into(),
                        message,
                    },
                })?;
        }
        Ok(())
    }
}

/// One `experimentConversions` entry on an ingested event.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ConversionRequest {
    pub recommender: String,
    pub experiment: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub metric: String,
}

fn locate_variation<'n>(
    node: &'n crate::config::RecommenderNode,
    target: &str,
) -> Result<(&'n String, &'n crate::config::VariationNode)> {
    if let Some(found) = node.variations.iter().find(|(n, _)| n == target) {
        return Ok((&found.0, &found.1));
    }
    if target.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(index) = target.parse::<usize>() {
            if let Some(found) = node.variations.get(index) {
                return Ok((&found.0, &found.1));
            }
        }
    }
    Err(Error::NoMatchedTarget)
}

fn schedule_exposure_events(
    evaluator: Arc<dyn ExperimentEvaluator>,
    _project: &str,
    experiment_name: &str,
    experiment: &ExperimentConfig,
    user_id: &str,
    background: &mut BackgroundTaskGroup,
) {
    for metric in &experiment.metrics {
        if !metric.track_exposures {
            continue;
        }
        let metric_name = metric.name.clone();
        let experiment_name = experiment_name.to_string();
        let user_id = user_id.to_string();
        let evaluator = evaluator.clone();
        background.spawn_best_effort(async move {
            evaluator
                .record_exposure(&experiment_name, &user_id, &metric_name)
                .await
                .map_err(|e| Error::Internal(format!("exposure recording failed: {e}")))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::*;

    fn recommender_with(variations: Vec<(&str, VariationKind)>, experiments: Vec<(&str, &str)>) -> EffectiveRecommenderConfig {
        let variations = variations
            .into_iter()
            .map(|(name, kind)| {
                (
                    name.to_string(),
                    VariationNode {
                        kind,
                        arn: None,
                        endpoint_name: None,
                        function_name: Some("fn".into()),
                        url_template: None,
                        inherited: Inheritable::default(),
                    },
                )
            })
            .collect();
        let experiments = experiments
            .into_iter()
            .map(|(name, method)| {
                (
                    name.to_string(),
                    ExperimentConfig {
                        method: method.to_string(),
                        metrics: vec![ExperimentMetric {
                            name: "ctr".into(),
                            track_exposures: true,
                        }],
                    },
                )
            })
            .collect();
        EffectiveRecommenderConfig {
            namespace: "ns".into(),
            recommender: "rec".into(),
            action: ActionKind::RecommendItems,
            node: RecommenderNode {
                variations,
                experiments,
                response_post_processor: None,
                inherited: Inheritable::default(),
            },
            effective: Inheritable::default(),
        }
    }

    #[tokio::test]
    async fn single_variation_short_circuits() {
        let recommender = recommender_with(vec![("v1", VariationKind::Function)], vec![]);
        let selector = VariationSelector::new(Arc::new(NullEvaluator));
        let mut bg = BackgroundTaskGroup::new();
        let selection = selector
            .select(&recommender, "proj", None, Some("u1"), &mut bg)
            .await
            .unwrap();
        assert_eq!(selection.variation.name, "v1");
        assert!(selection.matched_experiment.is_none());
        bg.join().await.unwrap();
    }

    #[tokio::test]
    async fn no_variations_fails() {
        let recommender = recommender_with(vec![], vec![]);
        let selector = VariationSelector::new(Arc::new(NullEvaluator));
        let mut bg = BackgroundTaskGroup::new();
        let err = selector.select(&recommender, "proj", None, Some("u1"), &mut bg).await.unwrap_err();
        assert!(matches!(err, Error::NoVariationsConfigured));
    }

    #[tokio::test]
    async fn no_user_id_returns_first_variation() {
        let recommender = recommender_with(
            vec![("a", VariationKind::Function), ("b", VariationKind::Function)],
            vec![("exp1", "managed")],
        );
        let selector = VariationSelector::new(Arc::new(NullEvaluator));
        let mut bg = BackgroundTaskGroup::new();
        let selection = selector.select(&recommender, "proj", None, None, &mut bg).await.unwrap();
        assert_eq!(selection.variation.name, "a");
    }
}

//! AppState: the process-wide, cheaply-cloneable handle every request
//! handler shares (spec.md §2, §5).

use std::sync::Arc;

use crate::config::ConfigProvider;
use crate::decorator::DecoratorRegistry;
use crate::events::EventFanOut;
use crate::gateway_env::GatewayEnv;
use crate::metrics::Metrics;
use crate::postprocess::ResponsePostProcessor;
use crate::resolver::ResolverRegistry;
use crate::variation::ExperimentEvaluator;

#[derive(Clone)]
pub struct AppState(Arc<Inner>);

struct Inner {
    pub config_provider: ConfigProvider,
    pub decorators: DecoratorRegistry,
    pub resolvers: ResolverRegistry,
    pub evaluator: Arc<dyn ExperimentEvaluator>,
    pub event_fan_out: EventFanOut,
    pub post_processor: ResponsePostProcessor,
    pub metrics: Arc<dyn Metrics>,
    pub env: GatewayEnv,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config_provider: ConfigProvider,
        decorators: DecoratorRegistry,
        resolvers: ResolverRegistry,
        evaluator: Arc<dyn ExperimentEvaluator>,
        event_fan_out: EventFanOut,
        post_processor: ResponsePostProcessor,
        metrics: Arc<dyn Metrics>,
        env: GatewayEnv,
    ) -> Self {
        Self(Arc::new(Inner {
            config_provider,
            decorators,
            resolvers,
            evaluator,
            event_fan_out,
            post_processor,
            metrics,
            env,
        }))
    }

    pub fn config_provider(&self) -> &ConfigProvider {
        &self.0.config_provider
    }

    pub fn decorators(&self) -> &DecoratorRegistry {
        &self.0.decorators
    }

    pub fn resolvers(&self) -> &ResolverRegistry {
        &self.0.resolvers
    }

    pub fn evaluator(&self) -> Arc<dyn ExperimentEvaluator> {
        self.0.evaluator.clone()
    }

    pub fn event_fan_out(&self) -> &EventFanOut {
        &self.0.event_fan_out
    }

    pub fn post_processor(&self) -> &ResponsePostProcessor {
        &self.0.post_processor
    }

    pub fn metrics(&self) -> Arc<dyn Metrics> {
        self.0.metrics.clone()
    }

    pub fn env(&self) -> &GatewayEnv {
        &self.0.env
    }
}

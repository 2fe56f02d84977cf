//! Process entry point: reads environment, assembles [`AppState`], and
//! serves the HTTP surface (spec.md §6).

use std::sync::Arc;
use std::time::Duration;

use personalize_gateway::config::ConfigProvider;
use personalize_gateway::decorator::{DecoratorRegistry, KeyValueStoreDecorator, LocalIndexedFileDecorator};
use personalize_gateway::events::EventFanOut;
use personalize_gateway::metrics::{Metrics, TracingMetrics};
use personalize_gateway::postprocess::ResponsePostProcessor;
use personalize_gateway::resolver::{FunctionResolver, HttpResolver, ManagedRecommenderResolver, ModelEndpointResolver, ResolverRegistry};
use personalize_gateway::variation::{ExperimentEvaluator, ManagedFeatureEvaluator};
use personalize_gateway::{build_router, AppState, GatewayEnv};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let env = GatewayEnv::from_env();

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .expect("failed to build downstream HTTP client");

    let metrics: Arc<dyn Metrics> = Arc::new(TracingMetrics);
    let evaluator: Arc<dyn ExperimentEvaluator> =
        Arc::new(ManagedFeatureEvaluator::new("http://localhost:9100", http.clone()));

    let config_provider = ConfigProvider::new(env.config_sidecar_url.clone());

    let decorators = {
        let http = http.clone();
        let metrics = metrics.clone();
        let prefix = env.metadata_table_prefix.clone();
        let primary_key = env.metadata_primary_key.clone();
        let bucket = env.staging_bucket.clone();
        let local_file_http = http.clone();
        DecoratorRegistry::new(
            move |namespace: &str| {
                KeyValueStoreDecorator::new(
                    "http://localhost:8500",
                    format!("{prefix}{namespace}"),
                    primary_key.clone(),
                    http.clone(),
                    metrics.clone(),
                )
            },
            move |namespace: &str| {
                LocalIndexedFileDecorator::new(
                    namespace.to_string(),
                    format!("/tmp/personalize-metadata/{namespace}.json"),
                    bucket.clone(),
                    local_file_http.clone(),
                )
            },
        )
    };

    let resolvers = ResolverRegistry::new(
        ManagedRecommenderResolver::new("http://localhost:8400", http.clone(), metrics.clone()),
        ModelEndpointResolver::new(http.clone()),
        FunctionResolver::new(http.clone()),
        HttpResolver::new(http.clone()),
    );

    let event_fan_out = EventFanOut::new(http.clone());
    let post_processor = ResponsePostProcessor::new(http.clone());

    let state = AppState::new(
        config_provider,
        decorators,
        resolvers,
        evaluator,
        event_fan_out,
        post_processor,
        metrics,
        env.clone(),
    );

    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&env.bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {e}", env.bind_addr));

    tracing::info!(addr = %env.bind_addr, "personalization gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install ctrl-c handler");
    tracing::info!("shutdown signal received");
}

//! End-to-end scenarios (spec.md §8) driven through the real axum [`Router`],
//! with every downstream dependency stood up as a local HTTP server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use serde_json::{json, Value};
use tower::ServiceExt;

use personalize_gateway::config::ConfigProvider;
use personalize_gateway::decorator::{DecoratorRegistry, KeyValueStoreDecorator, LocalIndexedFileDecorator};
use personalize_gateway::events::EventFanOut;
use personalize_gateway::metrics::{Metrics, TracingMetrics};
use personalize_gateway::postprocess::ResponsePostProcessor;
use personalize_gateway::resolver::{
    FunctionResolver, HttpResolver, ManagedRecommenderResolver, ModelEndpointResolver, ResolverRegistry,
};
use personalize_gateway::variation::{ExperimentEvaluator, ManagedFeatureEvaluator, NullEvaluator};
use personalize_gateway::{build_router, AppState};

/// Starts a throwaway HTTP server returning `body` (as JSON) for every
/// request it receives, on an OS-assigned loopback port. Returns the base
/// URL and a request counter the test can assert against.
async fn spawn_json_server(body: Value) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    #[derive(Clone)]
    struct Canned {
        body: Value,
        hits: Arc<AtomicUsize>,
    }
    async fn handler(State(canned): State<Canned>) -> impl IntoResponse {
        canned.hits.fetch_add(1, Ordering::SeqCst);
        Json(canned.body.clone())
    }
    let state = Canned { body, hits: hits.clone() };
    let router = axum::Router::new().fallback(handler).with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{addr}"), hits)
}

/// Starts a throwaway object-storage stand-in that serves `body` gzip-
/// compressed for every request, matching what
/// `LocalIndexedFileDecorator::refresh_from_object_storage` expects to
/// download and decompress.
async fn spawn_object_storage_server(body: &Value) -> String {
    use std::io::Write;
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(body.to_string().as_bytes()).unwrap();
    let compressed = encoder.finish().unwrap();

    #[derive(Clone)]
    struct Canned {
        compressed: Arc<Vec<u8>>,
    }
    async fn handler(State(canned): State<Canned>) -> Vec<u8> {
        (*canned.compressed).clone()
    }
    let state = Canned {
        compressed: Arc::new(compressed),
    };
    let router = axum::Router::new().fallback(handler).with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Binds a collecting mock server to a *fixed* port, matching the
/// conventional endpoints the event sinks post to (spec.md §4.6 lists these
/// as fixed, not configurable, per downstream; `EventFanOut::with_base_urls`
/// lets tests redirect them, so fixed local ports here are just a
/// convenient, collision-free choice for this test binary).
async fn spawn_collector(addr: &str) -> Arc<std::sync::Mutex<Vec<Value>>> {
    let received: Arc<std::sync::Mutex<Vec<Value>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    #[derive(Clone)]
    struct Collector {
        received: Arc<std::sync::Mutex<Vec<Value>>>,
    }
    async fn handler(State(collector): State<Collector>, Json(body): Json<Value>) -> impl IntoResponse {
        collector.received.lock().unwrap().push(body);
        Json(json!({"status": "ok"}))
    }
    let state = Collector {
        received: received.clone(),
    };
    let router = axum::Router::new().fallback(handler).with_state(state);
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    received
}

fn base_config(namespace_extra: Value) -> Value {
    let mut doc = json!({
        "version": "v1",
        "namespaces": {}
    });
    doc["namespaces"]["ns1"] = namespace_extra;
    doc
}

async fn state_with(
    config_body: Value,
    resolvers: ResolverRegistry,
    evaluator: Arc<dyn ExperimentEvaluator>,
    event_fan_out: EventFanOut,
) -> (AppState, Arc<AtomicUsize>) {
    let (config_url, config_hits) = spawn_json_server(config_body).await;
    let http = reqwest::Client::new();
    let metrics: Arc<dyn Metrics> = Arc::new(TracingMetrics);

    let decorators = DecoratorRegistry::new(
        move |ns: &str| KeyValueStoreDecorator::new("http://127.0.0.1:1", format!("tbl-{ns}"), "itemId", http.clone(), metrics.clone()),
        move |ns: &str| LocalIndexedFileDecorator::new(ns.to_string(), "/nonexistent/does-not-matter.json", "http://127.0.0.1:1", reqwest::Client::new()),
    );

    let state = AppState::new(
        ConfigProvider::new(config_url),
        decorators,
        resolvers,
        evaluator,
        event_fan_out,
        ResponsePostProcessor::new(reqwest::Client::new()),
        Arc::new(TracingMetrics),
        personalize_gateway::GatewayEnv {
            region: "us-east-1".into(),
            staging_bucket: String::new(),
            metadata_table_prefix: "metadata-".into(),
            metadata_primary_key: "itemId".into(),
            config_sidecar_url: String::new(),
            bind_addr: "127.0.0.1:0".into(),
        },
    );
    (state, config_hits)
}

fn default_resolvers() -> ResolverRegistry {
    let http = reqwest::Client::new();
    ResolverRegistry::new(
        ManagedRecommenderResolver::new("http://127.0.0.1:1", http.clone(), Arc::new(TracingMetrics)),
        ModelEndpointResolver::new(http.clone()),
        FunctionResolver::new(http.clone()),
        HttpResolver::new(http),
    )
}

#[tokio::test]
async fn recommend_items_with_no_experiments() {
    let (function_url, function_hits) = spawn_json_server(json!({
        "itemList": [{"itemId": "i1"}, {"itemId": "i2"}]
    }))
    .await;

    let config = base_config(json!({
        "recommenders": {
            "recommend-items": {
                "rec1": {
                    "variations": [["v1", {"type": "function", "functionName": function_url}]]
                }
            }
        }
    }));

    let (state, _config_hits) = state_with(config, default_resolvers(), Arc::new(NullEvaluator), EventFanOut::new(reqwest::Client::new())).await;
    let router = build_router(state);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/recommend-items/ns1/rec1/user-42?decorateItems=false")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(function_hits.load(Ordering::SeqCst), 1);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["itemList"].as_array().unwrap().len(), 2);
    assert!(value.get("matchedExperiment").is_none());
}

#[tokio::test]
async fn related_items_with_local_file_decoration() {
    let (function_url, _hits) = spawn_json_server(json!({
        "itemList": [{"itemId": "a"}, {"itemId": "b"}]
    }))
    .await;

    let metadata_path = std::env::temp_dir().join(format!("gateway-e2e-related-{}.json", std::process::id()));
    std::fs::write(&metadata_path, json!({"a": {"title": "Alpha"}, "b": {"title": "Beta"}}).to_string()).unwrap();

    // prepare_datastores unconditionally schedules a background refresh on
    // first use (spec.md §4.5/§4.9); point it at a real object-storage
    // stand-in so that non-best-effort background task succeeds rather than
    // failing the request (decoration itself reads the file written above,
    // independent of the refreshed content, since decoration runs before the
    // background group is joined).
    let object_storage_url = spawn_object_storage_server(&json!({"a": {"title": "Alpha"}, "b": {"title": "Beta"}})).await;

    let config = base_config(json!({
        "inferenceItemMetadata": {"type": "local-file"},
        "recommenders": {
            "related-items": {
                "rec1": {
                    "variations": [["v1", {"type": "function", "functionName": function_url}]]
                }
            }
        }
    }));

    let http = reqwest::Client::new();
    let (config_url, _config_hits) = spawn_json_server(config).await;
    let metrics: Arc<dyn Metrics> = Arc::new(TracingMetrics);
    let metadata_path_clone = metadata_path.clone();
    let decorators = DecoratorRegistry::new(
        move |ns: &str| {
            KeyValueStoreDecorator::new("http://127.0.0.1:1", format!("tbl-{ns}"), "itemId", http.clone(), metrics.clone())
        },
        move |ns: &str| {
            LocalIndexedFileDecorator::new(ns.to_string(), metadata_path_clone.clone(), object_storage_url.clone(), reqwest::Client::new())
        },
    );
    let state = AppState::new(
        ConfigProvider::new(config_url),
        decorators,
        default_resolvers(),
        Arc::new(NullEvaluator),
        EventFanOut::new(reqwest::Client::new()),
        ResponsePostProcessor::new(reqwest::Client::new()),
        Arc::new(TracingMetrics),
        personalize_gateway::GatewayEnv {
            region: "us-east-1".into(),
            staging_bucket: String::new(),
            metadata_table_prefix: "metadata-".into(),
            metadata_primary_key: "itemId".into(),
            config_sidecar_url: String::new(),
            bind_addr: "127.0.0.1:0".into(),
        },
    );
    let router = build_router(state);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/related-items/ns1/rec1/a")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value: Value = serde_json::from_slice(&body).unwrap();
    let items = value["itemList"].as_array().unwrap();
    assert_eq!(items[0]["metadata"]["title"], "Alpha");
    assert_eq!(items[1]["metadata"]["title"], "Beta");

    let _ = std::fs::remove_file(&metadata_path);
}

#[tokio::test]
async fn rerank_items_by_path() {
    let (function_url, function_hits) = spawn_json_server(json!({
        "itemList": [{"itemId": "x"}, {"itemId": "y"}]
    }))
    .await;

    let config = base_config(json!({
        "recommenders": {
            "rerank-items": {
                "rec1": {
                    "variations": [["v1", {"type": "function", "functionName": function_url}]]
                }
            }
        }
    }));

    let (state, _hits) = state_with(config, default_resolvers(), Arc::new(NullEvaluator), EventFanOut::new(reqwest::Client::new())).await;
    let router = build_router(state);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/rerank-items/ns1/rec1/user-7/y,x?decorateItems=false")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(function_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn experiment_exposure_attaches_matched_experiment() {
    let (function_url, _fn_hits) = spawn_json_server(json!({"itemList": []})).await;

    #[derive(Clone)]
    struct EvalState {
        exposures: Arc<AtomicUsize>,
    }
    async fn evaluate(State(_state): State<EvalState>) -> impl IntoResponse {
        Json(json!({"variation": "treatment", "reason": "EXPERIMENT_RULE_MATCH"}))
    }
    async fn exposure(State(state): State<EvalState>) -> impl IntoResponse {
        state.exposures.fetch_add(1, Ordering::SeqCst);
        Json(json!({}))
    }
    let exposures = Arc::new(AtomicUsize::new(0));
    let eval_state = EvalState { exposures: exposures.clone() };
    let eval_router = axum::Router::new()
        .route("/projects/:ns/:rec/features/:feature/evaluate", get(evaluate))
        .route("/events/exposure", axum::routing::post(exposure))
        .with_state(eval_state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let eval_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, eval_router).await.unwrap();
    });
    let eval_url = format!("http://{eval_addr}");

    let config = base_config(json!({
        "recommenders": {
            "recommend-items": {
                "rec1": {
                    "variations": [
                        ["control", {"type": "function", "functionName": function_url}],
                        ["treatment", {"type": "function", "functionName": function_url}]
                    ],
                    "experiments": [
                        ["exp1", {"method": "managed", "metrics": [{"name": "ctr", "trackExposures": true}]}]
                    ]
                }
            }
        }
    }));

    let evaluator: Arc<dyn ExperimentEvaluator> = Arc::new(ManagedFeatureEvaluator::new(eval_url, reqwest::Client::new()));
    let (state, _hits) = state_with(config, default_resolvers(), evaluator, EventFanOut::new(reqwest::Client::new())).await;
    let router = build_router(state);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/recommend-items/ns1/rec1/user-9?decorateItems=false")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["matchedExperiment"]["feature"], "exp1");
    assert_eq!(exposures.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn conditional_get_hit_short_circuits_before_resolver_dispatch() {
    let (function_url, function_hits) = spawn_json_server(json!({"itemList": []})).await;

    let config = base_config(json!({
        "cacheControl": {"userSpecified": {"maxAge": 60}},
        "recommenders": {
            "recommend-items": {
                "rec1": {
                    "variations": [["v1", {"type": "function", "functionName": function_url}]]
                }
            }
        }
    }));

    let (state, _hits) = state_with(config, default_resolvers(), Arc::new(NullEvaluator), EventFanOut::new(reqwest::Client::new())).await;
    let router = build_router(state);

    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64;
    let fresh_etag = format!("{}-{}-{}", personalize_gateway::cache_header::checksum_for("/recommend-items/ns1/rec1/user-1"), now_ms, 60);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/recommend-items/ns1/rec1/user-1")
                .header("if-none-match", fresh_etag)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(function_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn event_fan_out_stamps_sent_at_and_reaches_two_sinks() {
    let tracker_received = spawn_collector("127.0.0.1:19200").await;
    let stream_received = spawn_collector("127.0.0.1:19300").await;

    let config = base_config(json!({
        "eventTargets": [
            {"type": "managed-tracker", "trackingId": "track-1"},
            {"type": "stream", "name": "stream-1"}
        ]
    }));

    let event_fan_out = EventFanOut::with_base_urls(
        reqwest::Client::new(),
        "http://127.0.0.1:19200",
        "http://127.0.0.1:19300",
        "http://127.0.0.1:19400",
    );

    let (state, _hits) = state_with(config, default_resolvers(), Arc::new(NullEvaluator), event_fan_out).await;
    let router = build_router(state);

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/events/ns1")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"eventList": [{"eventType": "click", "sessionId": "sess-1"}]}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert!(value["eventList"][0]["sentAt"].is_number());

    let tracker_body = tracker_received.lock().unwrap().clone();
    assert_eq!(tracker_body.len(), 1);
    assert!(tracker_body[0]["eventList"][0]["sentAt"].is_number());

    let stream_body = stream_received.lock().unwrap().clone();
    assert_eq!(stream_body.len(), 1);
    assert!(stream_body[0]["data"]["body"]["sentAt"].is_number());
}

#[tokio::test]
async fn recommender_not_found_is_404() {
    let config = base_config(json!({"recommenders": {}}));
    let (state, _hits) = state_with(config, default_resolvers(), Arc::new(NullEvaluator), EventFanOut::new(reqwest::Client::new())).await;
    let router = build_router(state);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/recommend-items/ns1/missing/user-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["type"], "NotFoundError");
}

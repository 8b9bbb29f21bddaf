//! Query Orchestrator end-to-end scenarios from spec §8, backed by wiremock
//! stand-ins for inference servers instead of a real llama.cpp binary.

use orchestrator_core::config::ServerConfig;
use orchestrator_core::event_bus::EventBus;
use orchestrator_core::metrics_aggregator::MetricsAggregator;
use orchestrator_core::orchestrator::QueryOrchestrator;
use orchestrator_core::selector::ModelSelector;
use orchestrator_core::server_manager::ServerManager;
use orchestrator_core::topology_tracker::TopologyTracker;
use orchestrator_types::{
    DiscoveredModel, ModelRegistry, ModelTier, QueryMode, QueryRequest, Quantization,
    RuntimeOverrides, ServerKey,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn model_with_port(model_id: &str, tier: ModelTier, port: u16) -> DiscoveredModel {
    DiscoveredModel {
        model_id: model_id.to_string(),
        file_path: PathBuf::from(format!("/models/{model_id}.gguf")),
        family: "fake".into(),
        variant: None,
        version: None,
        size_params: 7.0,
        quantization: Quantization::Q4KM,
        assigned_tier: tier,
        tier_override: None,
        thinking_override: None,
        enabled: true,
        port: Some(port),
        runtime: RuntimeOverrides::default(),
        is_thinking_model: false,
        is_instruct: true,
        is_coder: false,
    }
}

async fn mock_inference_server(response_content: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/completion"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": response_content,
            "tokens_predicted": 3,
            "tokens_evaluated": 5,
        })))
        .mount(&server)
        .await;
    server
}

fn server_port(server: &MockServer) -> u16 {
    server.uri().rsplit(':').next().unwrap().parse().unwrap()
}

async fn build_orchestrator(
    registry: ModelRegistry,
    server_manager: Arc<ServerManager>,
) -> QueryOrchestrator {
    let registry = Arc::new(RwLock::new(registry));
    let selector = Arc::new(ModelSelector::new(Arc::clone(&registry)));
    let event_bus = EventBus::new();
    let metrics = Arc::new(MetricsAggregator::new());
    let topology = Arc::new(TopologyTracker::new(event_bus.clone()));

    QueryOrchestrator::new(
        registry,
        selector,
        server_manager,
        event_bus,
        metrics,
        topology,
        None,
        None,
        "127.0.0.1".to_string(),
    )
}

#[tokio::test]
async fn simple_mode_returns_non_empty_response() {
    let mock = mock_inference_server("a simple answer").await;
    let port = server_port(&mock);

    let mut registry = ModelRegistry::new(PathBuf::from("/models"), (8100, 8199));
    registry.models.insert(
        "fast-model".to_string(),
        model_with_port("fast-model", ModelTier::Fast, port),
    );

    let server_manager = Arc::new(ServerManager::new(ServerConfig {
        use_external_servers: true,
        host: "127.0.0.1".to_string(),
        ..ServerConfig::default()
    }));
    server_manager
        .start(ServerKey::Base("fast-model".to_string()), registry.models["fast-model"].clone())
        .await
        .unwrap();

    let orchestrator = build_orchestrator(registry, server_manager).await;

    let request = QueryRequest {
        query: "What is a list comprehension?".to_string(),
        mode: QueryMode::Simple,
        use_context: false,
        use_web_search: false,
        max_tokens: 256,
        temperature: 0.7,
        council: Default::default(),
        benchmark: Default::default(),
        instance_system_prompt: None,
    };

    let response = orchestrator.process(request).await.unwrap();
    assert!(!response.response.is_empty());
    assert_eq!(response.mode, QueryMode::Simple);
}

#[tokio::test]
async fn two_stage_mode_records_both_stage_models_in_metadata() {
    let fast_mock = mock_inference_server("draft answer").await;
    let balanced_mock = mock_inference_server("refined answer").await;

    let mut registry = ModelRegistry::new(PathBuf::from("/models"), (8100, 8199));
    registry.models.insert(
        "fast-model".to_string(),
        model_with_port("fast-model", ModelTier::Fast, server_port(&fast_mock)),
    );
    registry.models.insert(
        "balanced-model".to_string(),
        model_with_port("balanced-model", ModelTier::Balanced, server_port(&balanced_mock)),
    );

    let server_manager = Arc::new(ServerManager::new(ServerConfig {
        use_external_servers: true,
        host: "127.0.0.1".to_string(),
        ..ServerConfig::default()
    }));
    for (key, m) in registry.models.clone() {
        server_manager.start(ServerKey::Base(key), m).await.unwrap();
    }

    let orchestrator = build_orchestrator(registry, server_manager).await;

    let request = QueryRequest {
        query: "Explain Python list comprehensions".to_string(),
        mode: QueryMode::TwoStage,
        use_context: false,
        use_web_search: false,
        max_tokens: 256,
        temperature: 0.7,
        council: Default::default(),
        benchmark: Default::default(),
        instance_system_prompt: None,
    };

    let response = orchestrator.process(request).await.unwrap();
    assert!(!response.response.is_empty());
    assert!(response.metadata.contains_key("stage1ModelId"));
    assert!(response.metadata.contains_key("stage2ModelId"));
    assert_eq!(response.metadata["stage2Tier"], "BALANCED");
    assert!(response.total_time_ms > 0);
}

#[tokio::test]
async fn consensus_with_fewer_than_three_models_is_rejected() {
    let mock = mock_inference_server("answer").await;
    let mut registry = ModelRegistry::new(PathBuf::from("/models"), (8100, 8199));
    registry.models.insert(
        "only-model".to_string(),
        model_with_port("only-model", ModelTier::Fast, server_port(&mock)),
    );

    let server_manager = Arc::new(ServerManager::new(ServerConfig {
        use_external_servers: true,
        host: "127.0.0.1".to_string(),
        ..ServerConfig::default()
    }));
    server_manager
        .start(ServerKey::Base("only-model".to_string()), registry.models["only-model"].clone())
        .await
        .unwrap();

    let orchestrator = build_orchestrator(registry, server_manager).await;

    let mut council = orchestrator_types::CouncilOptions::default();
    council.adversarial = false;
    let request = QueryRequest {
        query: "Should we use microservices?".to_string(),
        mode: QueryMode::Council,
        use_context: false,
        use_web_search: false,
        max_tokens: 256,
        temperature: 0.7,
        council,
        benchmark: Default::default(),
        instance_system_prompt: None,
    };

    let result = orchestrator.process(request).await;
    assert!(result.is_err(), "consensus requires at least three enabled models");
}

#[tokio::test]
async fn benchmark_mode_fails_only_when_every_model_fails() {
    let registry = ModelRegistry::new(PathBuf::from("/models"), (8100, 8199));
    let server_manager = Arc::new(ServerManager::new(ServerConfig {
        use_external_servers: true,
        host: "127.0.0.1".to_string(),
        ..ServerConfig::default()
    }));
    let orchestrator = build_orchestrator(registry, server_manager).await;

    let request = QueryRequest {
        query: "benchmark this".to_string(),
        mode: QueryMode::Benchmark,
        use_context: false,
        use_web_search: false,
        max_tokens: 64,
        temperature: 0.7,
        council: Default::default(),
        benchmark: Default::default(),
        instance_system_prompt: None,
    };

    let result = orchestrator.process(request).await;
    assert!(result.is_err(), "benchmark mode with zero enabled models must fail");
}

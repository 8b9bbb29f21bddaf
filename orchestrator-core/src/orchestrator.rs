//! Query Orchestrator (spec §4.7).
//!
//! The single point where partial failures (retrieval, web search) are
//! recovered and unexpected errors are classified and surfaced (spec §7).

use crate::dialogue::{DebateModelCaller, DebateRequest, DialogueEngine, ModeratorOptions};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::event_bus::EventBus;
use crate::inference_client::{estimate_tokens, InferenceClient};
use crate::metrics_aggregator::MetricsAggregator;
use crate::retrieval::RetrievalProvider;
use crate::selector::ModelSelector;
use crate::server_manager::ServerManager;
use crate::topology_tracker::TopologyTracker;
use async_trait::async_trait;
use futures::future::join_all;
use orchestrator_types::{
    EventType, MetricDataPoint, ModelRegistry, ModelTier, QueryMode, QueryRequest, QueryResponse,
    ServerKey, Severity, SystemEvent,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

const STAGE1_MAX_TOKENS: u32 = 500;
const DEFAULT_POWERFUL_COMPLEXITY_THRESHOLD: f64 = 7.0;
const GENERATION_TIMEOUT: Duration = Duration::from_secs(120);

#[async_trait]
pub trait WebSearchCollaborator: Send + Sync {
    async fn search(&self, query: &str) -> OrchestratorResult<String>;
}

#[async_trait]
pub trait ComplexityAssessor: Send + Sync {
    async fn assess(&self, query: &str) -> OrchestratorResult<(f64, String)>;
}

/// Heuristic fallback when no collaborator is configured: query length alone.
pub struct LengthHeuristicAssessor;

#[async_trait]
impl ComplexityAssessor for LengthHeuristicAssessor {
    async fn assess(&self, query: &str) -> OrchestratorResult<(f64, String)> {
        let score = (query.split_whitespace().count() as f64 / 20.0).min(10.0);
        Ok((score, "heuristic: word-count based".to_string()))
    }
}

pub struct QueryOrchestrator {
    registry: Arc<RwLock<ModelRegistry>>,
    selector: Arc<ModelSelector>,
    server_manager: Arc<ServerManager>,
    event_bus: EventBus,
    metrics: Arc<MetricsAggregator>,
    topology: Arc<TopologyTracker>,
    retrieval: Option<Arc<dyn RetrievalProvider>>,
    web_search: Option<Arc<dyn WebSearchCollaborator>>,
    complexity_assessor: Arc<dyn ComplexityAssessor>,
    inference_host: String,
    powerful_complexity_threshold: f64,
}

struct Composed {
    prompt: String,
    artifact_count: usize,
    retrieval_time_ms: Option<u64>,
}

impl QueryOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<RwLock<ModelRegistry>>,
        selector: Arc<ModelSelector>,
        server_manager: Arc<ServerManager>,
        event_bus: EventBus,
        metrics: Arc<MetricsAggregator>,
        topology: Arc<TopologyTracker>,
        retrieval: Option<Arc<dyn RetrievalProvider>>,
        web_search: Option<Arc<dyn WebSearchCollaborator>>,
        inference_host: String,
    ) -> Self {
        Self {
            registry,
            selector,
            server_manager,
            event_bus,
            metrics,
            topology,
            retrieval,
            web_search,
            complexity_assessor: Arc::new(LengthHeuristicAssessor),
            inference_host,
            powerful_complexity_threshold: DEFAULT_POWERFUL_COMPLEXITY_THRESHOLD,
        }
    }

    pub async fn process(&self, request: QueryRequest) -> OrchestratorResult<QueryResponse> {
        request
            .validate()
            .map_err(OrchestratorError::Validation)?;

        let query_id = uuid::Uuid::new_v4();
        let started = std::time::Instant::now();
        self.emit_stage(query_id, "input", Severity::Info).await;

        let composed = self.compose_prompt(&request, query_id).await;

        let result = match request.mode {
            QueryMode::Simple => self.run_simple(&request, &composed, query_id).await,
            QueryMode::TwoStage => self.run_two_stage(&request, &composed, query_id).await,
            QueryMode::Council if request.council.adversarial => {
                self.run_debate(&request, &composed, query_id).await
            }
            QueryMode::Council => self.run_consensus(&request, &composed, query_id).await,
            QueryMode::Benchmark => self.run_benchmark(&request, &composed, query_id).await,
        };

        match result {
            Ok((response_text, mut metadata)) => {
                metadata.insert("cgragArtifacts".to_string(), Value::from(composed.artifact_count));
                let total_time_ms = started.elapsed().as_millis() as u64;
                self.event_bus
                    .publish(SystemEvent::new(
                        EventType::PipelineComplete,
                        Severity::Info,
                        format!("query {query_id} completed"),
                    ))
                    .await;
                Ok(QueryResponse {
                    query_id,
                    response: response_text,
                    mode: request.mode,
                    metadata,
                    total_time_ms,
                })
            }
            Err(e) => {
                self.event_bus
                    .publish(
                        SystemEvent::new(
                            EventType::PipelineFailed,
                            Severity::Error,
                            format!("query {query_id} failed: {e}"),
                        )
                        .with_metadata("queryId", query_id.to_string()),
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn emit_stage(&self, query_id: uuid::Uuid, stage: &str, severity: Severity) {
        self.event_bus
            .publish(
                SystemEvent::new(EventType::PipelineStageStart, severity, format!("stage {stage} started"))
                    .with_metadata("queryId", query_id.to_string())
                    .with_metadata("stage", stage),
            )
            .await;
    }

    async fn compose_prompt(&self, request: &QueryRequest, query_id: uuid::Uuid) -> Composed {
        let mut web_results: Option<String> = None;
        if request.use_web_search {
            if let Some(collaborator) = &self.web_search {
                match collaborator.search(&request.query).await {
                    Ok(text) => web_results = Some(text),
                    Err(e) => warn!(error = %e, "web search failed, continuing without it"),
                }
            }
        }

        let mut artifact_count = 0usize;
        let mut doc_context: Option<String> = None;
        let mut retrieval_time_ms = None;
        if request.use_context {
            if let Some(provider) = &self.retrieval {
                let started = std::time::Instant::now();
                match provider
                    .retrieve(std::path::Path::new("."), &request.query, 2000, 8)
                    .await
                {
                    Ok(result) => {
                        artifact_count = result.artifacts.len();
                        retrieval_time_ms = Some(started.elapsed().as_millis() as u64);
                        if !result.artifacts.is_empty() {
                            doc_context = Some(
                                result
                                    .artifacts
                                    .iter()
                                    .map(|c| format!("[{}] {}", c.source_path, c.text))
                                    .collect::<Vec<_>>()
                                    .join("\n---\n"),
                            );
                        }
                    }
                    Err(e) => warn!(error = %e, "retrieval failed, continuing without context"),
                }
            } else {
                warn!("use_context requested but no retrieval provider is configured");
            }
        }

        let mut prompt = String::new();
        if let Some(system_prompt) = &request.instance_system_prompt {
            prompt.push_str(system_prompt);
            prompt.push_str("\n\n");
        }
        if let Some(web) = &web_results {
            prompt.push_str("=== Web Search Results ===\n");
            prompt.push_str(web);
            prompt.push_str("\n\n");
        }
        if let Some(docs) = &doc_context {
            prompt.push_str("=== Documentation Context ===\n");
            prompt.push_str(docs);
            prompt.push_str("\n\n");
        }
        prompt.push_str(&request.query);
        prompt.push_str("\n\nRespond accurately and completely.");

        self.topology.record_flow(query_id, "orchestrator").await;
        Composed { prompt, artifact_count, retrieval_time_ms }
    }

    async fn generate_with_model(
        &self,
        model_id: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
        query_id: uuid::Uuid,
    ) -> OrchestratorResult<String> {
        let server = self
            .server_manager
            .get(&ServerKey::Base(model_id.to_string()))
            .await
            .ok_or_else(|| OrchestratorError::ModelUnavailable(model_id.to_string()))?;
        if !server.is_ready {
            return Err(OrchestratorError::ModelUnavailable(model_id.to_string()));
        }

        let client = InferenceClient::new(&self.inference_host, server.port, GENERATION_TIMEOUT);
        let started = std::time::Instant::now();
        let response = client.generate(prompt, max_tokens, temperature, None).await?;
        let elapsed_ms = started.elapsed().as_millis().max(1) as f64;

        self.topology.record_flow(query_id, model_id).await;
        let tokens_per_sec = response.tokens_predicted as f64 / elapsed_ms * 1000.0;
        self.metrics
            .record("response_time_ms", {
                let mut point = MetricDataPoint::now(elapsed_ms);
                point.model_id = Some(model_id.to_string());
                point
            })
            .await;
        self.metrics
            .record("tokens_per_sec", {
                let mut point = MetricDataPoint::now(tokens_per_sec);
                point.model_id = Some(model_id.to_string());
                point
            })
            .await;

        Ok(response.content)
    }

    async fn run_simple(
        &self,
        request: &QueryRequest,
        composed: &Composed,
        query_id: uuid::Uuid,
    ) -> OrchestratorResult<(String, HashMap<String, Value>)> {
        let model_id = self.selector.select(ModelTier::Fast).await?;
        let response = self
            .generate_with_model(&model_id, &composed.prompt, request.max_tokens, request.temperature, query_id)
            .await?;

        let mut metadata = HashMap::new();
        metadata.insert("modelId".to_string(), Value::from(model_id));
        metadata.insert("tier".to_string(), Value::from(ModelTier::Fast.to_string()));
        if let Some(ms) = composed.retrieval_time_ms {
            metadata.insert("retrievalTimeMs".to_string(), Value::from(ms));
        }
        Ok((response, metadata))
    }

    async fn run_two_stage(
        &self,
        request: &QueryRequest,
        composed: &Composed,
        query_id: uuid::Uuid,
    ) -> OrchestratorResult<(String, HashMap<String, Value>)> {
        let stage1_model = self.selector.select(ModelTier::Fast).await?;
        let stage1_response = self
            .generate_with_model(&stage1_model, &composed.prompt, STAGE1_MAX_TOKENS, request.temperature, query_id)
            .await?;

        let (complexity_score, complexity_reasoning) = self.complexity_assessor.assess(&request.query).await?;
        let stage2_tier = if complexity_score >= self.powerful_complexity_threshold {
            ModelTier::Powerful
        } else {
            ModelTier::Balanced
        };
        let stage2_model = self.selector.select(stage2_tier).await?;

        let stage2_prompt = format!(
            "Original query: {}\n\nInitial draft response:\n{}\n\nImprove and expand the draft above with full accuracy.",
            request.query, stage1_response
        );
        let stage2_response = self
            .generate_with_model(&stage2_model, &stage2_prompt, request.max_tokens, request.temperature, query_id)
            .await?;

        let mut metadata = HashMap::new();
        metadata.insert("stage1ModelId".to_string(), Value::from(stage1_model));
        metadata.insert("stage1Tier".to_string(), Value::from(ModelTier::Fast.to_string()));
        metadata.insert("stage2ModelId".to_string(), Value::from(stage2_model));
        metadata.insert("stage2Tier".to_string(), Value::from(stage2_tier.to_string()));
        metadata.insert("complexityScore".to_string(), Value::from(complexity_score));
        metadata.insert("complexityReasoning".to_string(), Value::from(complexity_reasoning));
        Ok((stage2_response, metadata))
    }

    async fn run_consensus(
        &self,
        request: &QueryRequest,
        composed: &Composed,
        query_id: uuid::Uuid,
    ) -> OrchestratorResult<(String, HashMap<String, Value>)> {
        let participants = self.pick_consensus_participants().await?;

        let round1_futures = participants.iter().map(|model_id| {
            let model_id = model_id.clone();
            async move {
                let result = self
                    .generate_with_model(&model_id, &composed.prompt, STAGE1_MAX_TOKENS, request.temperature, query_id)
                    .await;
                (model_id, result)
            }
        });
        let round1: Vec<(String, OrchestratorResult<String>)> = join_all(round1_futures).await;
        let successes = round1.iter().filter(|(_, r)| r.is_ok()).count();
        if successes < 2 {
            return Err(OrchestratorError::Internal(
                "fewer than two models produced a round 1 consensus answer".to_string(),
            ));
        }

        let round1_texts: HashMap<String, String> = round1
            .iter()
            .filter_map(|(id, r)| r.as_ref().ok().map(|t| (id.clone(), t.clone())))
            .collect();

        let round2_futures = participants.iter().map(|model_id| {
            let model_id = model_id.clone();
            let own_answer = round1_texts.get(&model_id).cloned();
            let others: Vec<String> = round1_texts
                .iter()
                .filter(|(id, _)| *id != &model_id)
                .map(|(id, text)| format!("[{id}] {text}"))
                .collect();
            async move {
                let Some(own) = own_answer else {
                    return (model_id, Err(OrchestratorError::ModelUnavailable("no round 1 answer".to_string())));
                };
                let prompt = format!(
                    "Original query: {}\n\nYour round 1 answer:\n{own}\n\nOther participants' answers:\n{}\n\nRefine your answer while preserving your perspective.",
                    request.query,
                    others.join("\n")
                );
                let result = self
                    .generate_with_model(&model_id, &prompt, request.max_tokens, request.temperature, query_id)
                    .await;
                (model_id, result)
            }
        });
        let round2: Vec<(String, OrchestratorResult<String>)> = join_all(round2_futures).await;

        let round2_texts: Vec<(String, String)> = round2
            .into_iter()
            .map(|(id, result)| match result {
                Ok(text) => (id, text),
                Err(_) => {
                    let fallback = round1_texts.get(&id).cloned().unwrap_or_default();
                    (id, fallback)
                }
            })
            .collect();

        let synthesizer = &participants[participants.len() - 1];
        let synthesis_prompt = format!(
            "Original query: {}\n\nParticipant answers:\n{}\n\nProduce a single consensus answer.",
            request.query,
            round2_texts
                .iter()
                .map(|(id, text)| format!("[{id}] {text}"))
                .collect::<Vec<_>>()
                .join("\n")
        );
        let synthesis = match self
            .generate_with_model(synthesizer, &synthesis_prompt, request.max_tokens, request.temperature, query_id)
            .await
        {
            Ok(text) => text,
            Err(_) => round2_texts
                .iter()
                .max_by_key(|(_, text)| text.len())
                .map(|(_, text)| text.clone())
                .unwrap_or_default(),
        };

        let mut metadata = HashMap::new();
        metadata.insert("participants".to_string(), Value::from(participants));
        metadata.insert("round1Count".to_string(), Value::from(round1.len()));
        metadata.insert("round2Count".to_string(), Value::from(round2_texts.len()));
        Ok((synthesis, metadata))
    }

    async fn pick_consensus_participants(&self) -> OrchestratorResult<Vec<String>> {
        let registry = self.registry.read().await;
        let mut participants = Vec::new();
        for tier in [ModelTier::Fast, ModelTier::Balanced, ModelTier::Powerful] {
            if let Some(model) = registry.models_in_tier(tier).next() {
                participants.push(model.model_id.clone());
            }
        }
        if participants.len() < 3 {
            for model in registry.enabled_models() {
                if participants.len() >= 3 {
                    break;
                }
                if !participants.contains(&model.model_id) {
                    participants.push(model.model_id.clone());
                }
            }
        }
        if participants.len() < 3 {
            return Err(OrchestratorError::Validation(
                "consensus mode requires at least three enabled models".to_string(),
            ));
        }
        Ok(participants)
    }

    async fn run_debate(
        &self,
        request: &QueryRequest,
        composed: &Composed,
        query_id: uuid::Uuid,
    ) -> OrchestratorResult<(String, HashMap<String, Value>)> {
        let (pro_id, con_id) = self.resolve_debate_participants(request).await?;
        self.validate_debate_participant(&pro_id).await?;
        self.validate_debate_participant(&con_id).await?;

        let personas = [
            request
                .council
                .personas
                .get(&pro_id)
                .map(|s| s.as_str())
                .unwrap_or("PRO advocate"),
            request
                .council
                .personas
                .get(&con_id)
                .map(|s| s.as_str())
                .unwrap_or("CON advocate"),
        ];

        let moderator = if request.council.moderator {
            request.council.moderator_model.clone().map(|model| ModeratorOptions {
                enabled: true,
                frequency: 2,
                max_interjections: 3,
                moderator_model: model,
            })
        } else {
            None
        };

        let caller = OrchestratorDebateCaller {
            orchestrator: self,
            query_id,
        };
        let engine = DialogueEngine::new(&caller);
        let result = engine
            .run_debate(DebateRequest {
                participants: [&pro_id, &con_id],
                query: &request.query,
                personas,
                context: if composed.artifact_count > 0 { Some(composed.prompt.as_str()) } else { None },
                max_turns: request.council.max_turns,
                dynamic_termination: request.council.dynamic_termination,
                temperature: request.temperature,
                per_turn_max_tokens: request.max_tokens,
                moderator,
            })
            .await;

        let mut metadata = HashMap::new();
        metadata.insert("proModel".to_string(), Value::from(pro_id));
        metadata.insert("conModel".to_string(), Value::from(con_id));
        metadata.insert("turnCount".to_string(), Value::from(result.turns.len()));
        metadata.insert(
            "terminationReason".to_string(),
            serde_json::to_value(result.termination_reason).unwrap_or(Value::Null),
        );
        metadata.insert("moderatorInterjectionCount".to_string(), Value::from(result.moderator_interjection_count));
        Ok((result.synthesis, metadata))
    }

    async fn resolve_debate_participants(&self, request: &QueryRequest) -> OrchestratorResult<(String, String)> {
        if let (Some(pro), Some(con)) = (&request.council.pro_model, &request.council.con_model) {
            return Ok((pro.clone(), con.clone()));
        }
        if request.council.participants.len() >= 2 {
            return Ok((request.council.participants[0].clone(), request.council.participants[1].clone()));
        }
        self.selector.select_debate_pair().await
    }

    async fn validate_debate_participant(&self, model_id: &str) -> OrchestratorResult<()> {
        let registry = self.registry.read().await;
        let model = registry
            .models
            .get(model_id)
            .ok_or_else(|| OrchestratorError::Validation(format!("debate participant {model_id} does not exist")))?;
        if !model.enabled {
            return Err(OrchestratorError::Validation(format!("debate participant {model_id} is disabled")));
        }
        drop(registry);
        self.server_manager
            .get(&ServerKey::Base(model_id.to_string()))
            .await
            .ok_or_else(|| OrchestratorError::ModelUnavailable(model_id.to_string()))?;
        Ok(())
    }

    async fn run_benchmark(
        &self,
        request: &QueryRequest,
        composed: &Composed,
        query_id: uuid::Uuid,
    ) -> OrchestratorResult<(String, HashMap<String, Value>)> {
        let model_ids: Vec<String> = {
            let registry = self.registry.read().await;
            registry.enabled_models().map(|m| m.model_id.clone()).collect()
        };
        if model_ids.is_empty() {
            return Err(OrchestratorError::Validation("benchmark mode requires at least one enabled model".to_string()));
        }

        let mut results: Vec<(String, OrchestratorResult<String>, u64)> = Vec::new();
        if request.benchmark.serial {
            for model_id in &model_ids {
                let started = std::time::Instant::now();
                let result = self
                    .generate_with_model(model_id, &composed.prompt, request.max_tokens, request.temperature, query_id)
                    .await;
                results.push((model_id.clone(), result, started.elapsed().as_millis() as u64));
            }
        } else {
            for batch in model_ids.chunks(request.benchmark.batch_size.max(1)) {
                let batch_futures = batch.iter().map(|model_id| {
                    let model_id = model_id.clone();
                    async move {
                        let started = std::time::Instant::now();
                        let result = self
                            .generate_with_model(&model_id, &composed.prompt, request.max_tokens, request.temperature, query_id)
                            .await;
                        (model_id, result, started.elapsed().as_millis() as u64)
                    }
                });
                results.extend(join_all(batch_futures).await);
            }
        }

        let all_failed = results.iter().all(|(_, r, _)| r.is_err());
        if all_failed {
            return Err(OrchestratorError::Internal("every model failed during benchmark".to_string()));
        }

        let vram_by_model: HashMap<String, f64> = {
            let registry = self.registry.read().await;
            model_ids
                .iter()
                .filter_map(|id| registry.models.get(id).map(|m| (id.clone(), m.estimated_vram_gb())))
                .collect()
        };

        let mut table = String::from("model_id\tsuccess\ttime_ms\ttokens\tvram_gb\n");
        let mut per_model = Vec::new();
        for (model_id, result, time_ms) in &results {
            let success = result.is_ok();
            let tokens = result.as_ref().map(|t| estimate_tokens(t)).unwrap_or(0);
            let vram_gb = vram_by_model.get(model_id).copied().unwrap_or(0.0);
            table.push_str(&format!("{model_id}\t{success}\t{time_ms}\t{tokens}\t{vram_gb:.2}\n"));
            per_model.push(serde_json::json!({
                "modelId": model_id,
                "success": success,
                "timeMs": time_ms,
                "tokens": tokens,
                "estimatedVramGb": vram_gb,
            }));
        }

        let successes: Vec<&(String, OrchestratorResult<String>, u64)> =
            results.iter().filter(|(_, r, _)| r.is_ok()).collect();
        let fastest = successes.iter().min_by_key(|(_, _, t)| *t).map(|(id, _, t)| (id.clone(), *t));
        let slowest = successes.iter().max_by_key(|(_, _, t)| *t).map(|(id, _, t)| (id.clone(), *t));

        let mut metadata = HashMap::new();
        metadata.insert("results".to_string(), Value::from(per_model));
        if let Some((id, t)) = fastest {
            metadata.insert("fastestModelId".to_string(), Value::from(id));
            metadata.insert("fastestTimeMs".to_string(), Value::from(t));
        }
        if let Some((id, t)) = slowest {
            metadata.insert("slowestModelId".to_string(), Value::from(id));
            metadata.insert("slowestTimeMs".to_string(), Value::from(t));
        }
        Ok((table, metadata))
    }
}

struct OrchestratorDebateCaller<'a> {
    orchestrator: &'a QueryOrchestrator,
    query_id: uuid::Uuid,
}

#[async_trait]
impl<'a> DebateModelCaller for OrchestratorDebateCaller<'a> {
    async fn call(
        &self,
        model_id: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> OrchestratorResult<String> {
        self.orchestrator
            .generate_with_model(model_id, prompt, max_tokens, temperature, self.query_id)
            .await
    }
}

//! Inference Client (spec §4.3, §6).
//!
//! Retry/backoff shape pinned against the teacher's
//! `UpstreamHttpSseConnection::new` connection loop.

use crate::error::{OrchestratorError, OrchestratorResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MAX_RETRIES: u32 = 5;
const INITIAL_BACKOFF_SECS: u64 = 1;

#[derive(Debug, Clone, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tokens_predicted: u32,
    #[serde(default)]
    pub tokens_evaluated: u32,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Ok,
    Loading,
    Unreachable,
    Error,
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub latency_ms: f64,
}

/// A thin HTTP client talking to one inference server.
pub struct InferenceClient {
    base_url: String,
    client: reqwest::Client,
    request_timeout: Duration,
}

impl InferenceClient {
    pub fn new(host: &str, port: u16, request_timeout: Duration) -> Self {
        Self {
            base_url: format!("http://{host}:{port}"),
            client: reqwest::Client::new(),
            request_timeout,
        }
    }

    pub async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
        stop: Option<&[String]>,
    ) -> OrchestratorResult<CompletionResponse> {
        let body = CompletionRequest {
            prompt,
            max_tokens,
            temperature,
            stop,
        };

        let mut retry_count = 0u32;
        loop {
            let attempt = self.try_generate(&body).await;
            match attempt {
                Ok(response) => return Ok(response),
                Err(e) if retry_count < MAX_RETRIES => {
                    retry_count += 1;
                    let backoff_secs = INITIAL_BACKOFF_SECS * (1u64 << (retry_count - 1).min(4));
                    tracing::warn!(
                        attempt = retry_count,
                        max_retries = MAX_RETRIES,
                        backoff_secs,
                        error = %e,
                        "inference request failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_generate(&self, body: &CompletionRequest<'_>) -> OrchestratorResult<CompletionResponse> {
        let response = tokio::time::timeout(
            self.request_timeout,
            self.client
                .post(format!("{}/completion", self.base_url))
                .json(body)
                .send(),
        )
        .await
        .map_err(|_| OrchestratorError::Inference("request timed out".to_string()))?
        .map_err(|e| OrchestratorError::Inference(e.to_string()))?;

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| OrchestratorError::Inference(format!("malformed completion response: {e}")))?;

        if let Some(error) = &completion.error {
            return Err(OrchestratorError::Inference(error.clone()));
        }
        Ok(completion)
    }

    pub async fn health(&self) -> HealthReport {
        let started = std::time::Instant::now();
        let result = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let status = match result {
            Ok(response) if response.status().is_success() => HealthStatus::Ok,
            Ok(response) if response.status().as_u16() == 503 => HealthStatus::Loading,
            Ok(_) => HealthStatus::Error,
            Err(_) => HealthStatus::Unreachable,
        };
        HealthReport { status, latency_ms }
    }
}

/// `tokens ≈ words × 1.3`, the documented heuristic from spec §9.
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    ((words as f64) * 1.3).ceil() as usize
}

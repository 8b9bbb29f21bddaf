//! Query Orchestrator request/response types (spec §4.7).

use crate::models::ModelTier;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryMode {
    Simple,
    TwoStage,
    Council,
    Benchmark,
}

/// Persona assignment and moderator controls for council mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouncilOptions {
    #[serde(default)]
    pub adversarial: bool,
    #[serde(default)]
    pub pro_model: Option<String>,
    #[serde(default)]
    pub con_model: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub personas: HashMap<String, String>,
    #[serde(default)]
    pub persona_profile: Option<String>,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_true")]
    pub dynamic_termination: bool,
    #[serde(default)]
    pub moderator: bool,
    #[serde(default)]
    pub moderator_model: Option<String>,
}

fn default_max_turns() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkOptions {
    #[serde(default)]
    pub serial: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    3
}

/// Incoming request to the Query Orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub query: String,
    pub mode: QueryMode,
    #[serde(default)]
    pub use_context: bool,
    #[serde(default)]
    pub use_web_search: bool,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub council: CouncilOptions,
    #[serde(default)]
    pub benchmark: BenchmarkOptions,
    #[serde(default)]
    pub instance_system_prompt: Option<String>,
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.7
}

impl QueryRequest {
    /// Validates §4.7's length bound; returns `Err(message)` on violation.
    pub fn validate(&self) -> Result<(), String> {
        let len = self.query.chars().count();
        if len == 0 || len > 10_000 {
            return Err(format!(
                "query must be 1-10000 characters, got {len}"
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub query_id: uuid::Uuid,
    pub response: String,
    pub mode: QueryMode,
    pub metadata: HashMap<String, serde_json::Value>,
    pub total_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_is_rejected() {
        let request = QueryRequest {
            query: String::new(),
            mode: QueryMode::Simple,
            use_context: false,
            use_web_search: false,
            max_tokens: 100,
            temperature: 0.7,
            council: CouncilOptions::default(),
            benchmark: BenchmarkOptions::default(),
            instance_system_prompt: None,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn oversized_query_is_rejected() {
        let request = QueryRequest {
            query: "x".repeat(10_001),
            mode: QueryMode::Simple,
            use_context: false,
            use_web_search: false,
            max_tokens: 100,
            temperature: 0.7,
            council: CouncilOptions::default(),
            benchmark: BenchmarkOptions::default(),
            instance_system_prompt: None,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn tier_display_is_used_in_metadata_keys() {
        // Sanity check that ModelTier stays importable from this module's
        // public surface for orchestrator metadata construction.
        let tier = ModelTier::Fast;
        assert_eq!(tier.to_string(), "FAST");
    }
}

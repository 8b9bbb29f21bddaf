//! Model Selector (spec §4.4).

use crate::error::{OrchestratorError, OrchestratorResult};
use orchestrator_types::{ModelRegistry, ModelTier};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Tracks per-model lifetime request counts to approximate round-robin
/// selection among equally eligible models within a tier.
pub struct ModelSelector {
    registry: Arc<RwLock<ModelRegistry>>,
    request_counts: Arc<RwLock<HashMap<String, u64>>>,
}

impl ModelSelector {
    pub fn new(registry: Arc<RwLock<ModelRegistry>>) -> Self {
        Self {
            registry,
            request_counts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Picks a healthy model in `tier`, preferring the one with the lowest
    /// lifetime request count.
    pub async fn select(&self, tier: ModelTier) -> OrchestratorResult<String> {
        let registry = self.registry.read().await;
        let counts = self.request_counts.read().await;

        let chosen = registry
            .models_in_tier(tier)
            .min_by_key(|m| counts.get(&m.model_id).copied().unwrap_or(0))
            .map(|m| m.model_id.clone())
            .ok_or(OrchestratorError::NoModelsAvailable(tier))?;

        drop(counts);
        drop(registry);
        *self.request_counts.write().await.entry(chosen.clone()).or_insert(0) += 1;
        Ok(chosen)
    }

    /// Returns two enabled models from different tiers when possible,
    /// otherwise any two enabled models (spec §4.4).
    pub async fn select_debate_pair(&self) -> OrchestratorResult<(String, String)> {
        let registry = self.registry.read().await;
        let enabled: Vec<_> = registry.enabled_models().collect();
        if enabled.len() < 2 {
            return Err(OrchestratorError::Validation(
                "fewer than two enabled models available for debate".to_string(),
            ));
        }

        let mut by_tier: HashMap<ModelTier, Vec<&orchestrator_types::DiscoveredModel>> = HashMap::new();
        for model in &enabled {
            by_tier.entry(model.effective_tier()).or_default().push(model);
        }

        let tiers: Vec<ModelTier> = by_tier.keys().copied().collect();
        if tiers.len() >= 2 {
            let pro = by_tier[&tiers[0]][0].model_id.clone();
            let con = by_tier[&tiers[1]][0].model_id.clone();
            Ok((pro, con))
        } else {
            Ok((enabled[0].model_id.clone(), enabled[1].model_id.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_types::{DiscoveredModel, Quantization, RuntimeOverrides};
    use std::path::PathBuf;

    fn model(id: &str, tier: ModelTier) -> DiscoveredModel {
        DiscoveredModel {
            model_id: id.to_string(),
            file_path: PathBuf::from(format!("/models/{id}.gguf")),
            family: "test".into(),
            variant: None,
            version: None,
            size_params: 7.0,
            quantization: Quantization::Q4KM,
            assigned_tier: tier,
            tier_override: None,
            thinking_override: None,
            enabled: true,
            port: Some(8100),
            runtime: RuntimeOverrides::default(),
            is_thinking_model: false,
            is_instruct: true,
            is_coder: false,
        }
    }

    #[tokio::test]
    async fn select_fails_when_tier_empty() {
        let registry = ModelRegistry::new(PathBuf::from("/models"), (8100, 8199));
        let selector = ModelSelector::new(Arc::new(RwLock::new(registry)));
        let result = selector.select(ModelTier::Fast).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn select_prefers_lowest_request_count() {
        let mut registry = ModelRegistry::new(PathBuf::from("/models"), (8100, 8199));
        registry.models.insert("a".into(), model("a", ModelTier::Fast));
        registry.models.insert("b".into(), model("b", ModelTier::Fast));
        let selector = ModelSelector::new(Arc::new(RwLock::new(registry)));

        let first = selector.select(ModelTier::Fast).await.unwrap();
        let second = selector.select(ModelTier::Fast).await.unwrap();
        assert_ne!(first, second, "round robin should alternate between equally loaded models");
    }

    #[tokio::test]
    async fn debate_pair_requires_two_enabled_models() {
        let mut registry = ModelRegistry::new(PathBuf::from("/models"), (8100, 8199));
        registry.models.insert("a".into(), model("a", ModelTier::Fast));
        let selector = ModelSelector::new(Arc::new(RwLock::new(registry)));
        assert!(selector.select_debate_pair().await.is_err());
    }
}

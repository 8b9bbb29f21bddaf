//! Discovered-model and registry types (spec §3, §4.1).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Coarse performance classification assigned during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModelTier {
    Fast,
    Balanced,
    Powerful,
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModelTier::Fast => "FAST",
            ModelTier::Balanced => "BALANCED",
            ModelTier::Powerful => "POWERFUL",
        };
        write!(f, "{s}")
    }
}

/// Closed set of recognized weight-quantization tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quantization {
    Q2K,
    Q3KM,
    Q3KS,
    Q3K,
    Q4K,
    Q4KM,
    Q4KS,
    Q40,
    Q5KM,
    Q5K,
    Q5KS,
    Q50,
    Q6K,
    Q80,
    F16,
    F32,
}

impl Quantization {
    /// Parse a normalized (upper-cased) quantization token, e.g. `Q4_K_M`.
    pub fn parse(token: &str) -> Option<Self> {
        let normalized = token.to_uppercase();
        Some(match normalized.as_str() {
            "Q2_K" => Quantization::Q2K,
            "Q3_K_M" => Quantization::Q3KM,
            "Q3_K_S" => Quantization::Q3KS,
            "Q3_K" => Quantization::Q3K,
            "Q4_K" => Quantization::Q4K,
            "Q4_K_M" => Quantization::Q4KM,
            "Q4_K_S" => Quantization::Q4KS,
            "Q4_0" => Quantization::Q40,
            "Q5_K_M" => Quantization::Q5KM,
            "Q5_K" => Quantization::Q5K,
            "Q5_K_S" => Quantization::Q5KS,
            "Q5_0" => Quantization::Q50,
            "Q6_K" => Quantization::Q6K,
            "Q8_0" => Quantization::Q80,
            "F16" => Quantization::F16,
            "F32" => Quantization::F32,
            _ => return None,
        })
    }

    /// Canonical on-wire/filename token, e.g. `Q4_K_M`.
    pub fn as_token(&self) -> &'static str {
        match self {
            Quantization::Q2K => "Q2_K",
            Quantization::Q3KM => "Q3_K_M",
            Quantization::Q3KS => "Q3_K_S",
            Quantization::Q3K => "Q3_K",
            Quantization::Q4K => "Q4_K",
            Quantization::Q4KM => "Q4_K_M",
            Quantization::Q4KS => "Q4_K_S",
            Quantization::Q40 => "Q4_0",
            Quantization::Q5KM => "Q5_K_M",
            Quantization::Q5K => "Q5_K",
            Quantization::Q5KS => "Q5_K_S",
            Quantization::Q50 => "Q5_0",
            Quantization::Q6K => "Q6_K",
            Quantization::Q80 => "Q8_0",
            Quantization::F16 => "F16",
            Quantization::F32 => "F32",
        }
    }

    /// Whether this tag belongs to the "low quantization" set used by the FAST tier rule.
    pub fn is_low_quant(&self) -> bool {
        matches!(
            self,
            Quantization::Q2K
                | Quantization::Q3K
                | Quantization::Q3KM
                | Quantization::Q3KS
                | Quantization::Q40
                | Quantization::Q4K
                | Quantization::Q4KM
                | Quantization::Q4KS
        )
    }

    /// Approximate bits-per-weight for the closed-form VRAM estimate (spec §4.7 benchmark mode).
    pub fn bits_per_weight(&self) -> f64 {
        match self {
            Quantization::Q2K => 2.5,
            Quantization::Q3K | Quantization::Q3KS => 3.0,
            Quantization::Q3KM => 3.5,
            Quantization::Q40 | Quantization::Q4K | Quantization::Q4KS => 4.0,
            Quantization::Q4KM => 4.5,
            Quantization::Q50 | Quantization::Q5K | Quantization::Q5KS => 5.0,
            Quantization::Q5KM => 5.5,
            Quantization::Q6K => 6.0,
            Quantization::Q80 => 8.0,
            Quantization::F16 => 16.0,
            Quantization::F32 => 32.0,
        }
    }
}

/// Per-model runtime overrides (spec §3 `DiscoveredModel`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeOverrides {
    #[serde(default)]
    pub n_gpu_layers: Option<i32>,
    #[serde(default)]
    pub ctx_size: Option<u32>,
    #[serde(default)]
    pub n_threads: Option<u32>,
    #[serde(default)]
    pub batch_size: Option<u32>,
}

/// A quantized model artifact discovered on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredModel {
    pub model_id: String,
    pub file_path: PathBuf,
    pub family: String,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    pub size_params: f64,
    pub quantization: Quantization,
    pub assigned_tier: ModelTier,
    #[serde(default)]
    pub tier_override: Option<ModelTier>,
    #[serde(default)]
    pub thinking_override: Option<bool>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub runtime: RuntimeOverrides,
    pub is_thinking_model: bool,
    #[serde(default)]
    pub is_instruct: bool,
    #[serde(default)]
    pub is_coder: bool,
}

fn default_true() -> bool {
    true
}

impl DiscoveredModel {
    /// The effective tier after applying a user override, if any.
    pub fn effective_tier(&self) -> ModelTier {
        self.tier_override.unwrap_or(self.assigned_tier)
    }

    /// The effective thinking-model flag after applying a user override, if any.
    pub fn effective_thinking(&self) -> bool {
        self.thinking_override.unwrap_or(self.is_thinking_model)
    }

    /// Closed-form VRAM footprint estimate in GiB: weights plus a fixed overhead
    /// fraction for KV-cache and activation buffers (spec §4.7 benchmark mode).
    pub fn estimated_vram_gb(&self) -> f64 {
        let weight_bytes = self.size_params * 1e9 * (self.quantization.bits_per_weight() / 8.0);
        (weight_bytes / 1e9) * 1.15
    }
}

/// Tier-assignment thresholds, persisted alongside the registry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierThresholds {
    pub powerful_min: f64,
    pub fast_max: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            powerful_min: 14.0,
            fast_max: 7.0,
        }
    }
}

/// Authoritative store of discovered models plus scan metadata (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRegistry {
    pub models: HashMap<String, DiscoveredModel>,
    pub scan_path: PathBuf,
    pub last_scan: chrono::DateTime<chrono::Utc>,
    pub port_range: (u16, u16),
    pub tier_thresholds: TierThresholds,
}

impl ModelRegistry {
    pub fn new(scan_path: PathBuf, port_range: (u16, u16)) -> Self {
        Self {
            models: HashMap::new(),
            scan_path,
            last_scan: chrono::Utc::now(),
            port_range,
            tier_thresholds: TierThresholds::default(),
        }
    }

    pub fn enabled_models(&self) -> impl Iterator<Item = &DiscoveredModel> {
        self.models.values().filter(|m| m.enabled)
    }

    pub fn models_in_tier(&self, tier: ModelTier) -> impl Iterator<Item = &DiscoveredModel> {
        self.enabled_models().filter(move |m| m.effective_tier() == tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantization_round_trips_through_token() {
        for q in [
            Quantization::Q4KM,
            Quantization::Q2K,
            Quantization::F16,
            Quantization::Q80,
        ] {
            let token = q.as_token();
            assert_eq!(Quantization::parse(token), Some(q));
        }
    }

    #[test]
    fn low_quant_set_matches_fast_tier_rule() {
        assert!(Quantization::Q4K.is_low_quant());
        assert!(Quantization::Q2K.is_low_quant());
        assert!(Quantization::Q4KS.is_low_quant());
        assert!(!Quantization::F16.is_low_quant());
        assert!(!Quantization::Q5KM.is_low_quant());
    }

    #[test]
    fn effective_tier_prefers_override() {
        let mut model = sample_model();
        assert_eq!(model.effective_tier(), ModelTier::Balanced);
        model.tier_override = Some(ModelTier::Fast);
        assert_eq!(model.effective_tier(), ModelTier::Fast);
    }

    fn sample_model() -> DiscoveredModel {
        DiscoveredModel {
            model_id: "llama_3_8b_q4_k_m_balanced".into(),
            file_path: PathBuf::from("/models/llama-3-8b-q4_k_m.gguf"),
            family: "llama".into(),
            variant: None,
            version: Some("3".into()),
            size_params: 8.0,
            quantization: Quantization::Q4KM,
            assigned_tier: ModelTier::Balanced,
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
}

//! Model Discovery & Registry (spec §4.1).
//!
//! Filename parsing follows three ordered regex patterns; the constants and
//! thresholds here are pinned against the original `model_discovery.py`
//! heuristics this spec distills.

use crate::error::{OrchestratorError, OrchestratorResult};
use orchestrator_types::{DiscoveredModel, ModelRegistry, ModelTier, Quantization, RuntimeOverrides};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::warn;

const THINKING_KEYWORDS: [&str; 4] = ["r1", "o1", "reasoning", "think"];

static PATTERN_1: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?P<family>[a-z]+)(?P<version>[0-9.]+)?(?:-(?P<variant>[a-z0-9]+))?-(?P<size>[0-9.]+)b(?:-(?P<kind>instruct|chat|coder))?-(?P<quant>[a-z0-9_]+)\.gguf$",
    )
    .expect("PATTERN_1 is a valid regex")
});

static PATTERN_2: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<family>[A-Za-z0-9]+)-(?P<variant>[A-Za-z0-9]+)(?:-(?P<version>[0-9.]+))?(?:-(?P<submodel>[A-Za-z0-9]+))?-(?P<size>[0-9.]+)B(?:-(?P<kind>Instruct|Chat|Coder))?-(?P<quant>[A-Za-z0-9_]+)\.gguf$",
    )
    .expect("PATTERN_2 is a valid regex")
});

static PATTERN_3: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<family>[a-z0-9]+)-(?P<size>[0-9.]+)[bB]-(?P<quant>[a-z0-9_]+)\.gguf$")
        .expect("PATTERN_3 is a valid regex")
});

struct ParsedFilename {
    family: String,
    variant: Option<String>,
    version: Option<String>,
    submodel: Option<String>,
    size_params: f64,
    quantization: Quantization,
    is_instruct: bool,
    is_coder: bool,
}

fn parse_filename(name: &str) -> Option<ParsedFilename> {
    if let Some(caps) = PATTERN_1.captures(name) {
        return build_parsed(&caps, None);
    }
    if let Some(caps) = PATTERN_2.captures(name) {
        let submodel = caps.name("submodel").map(|m| m.as_str().to_string());
        return build_parsed(&caps, submodel);
    }
    if let Some(caps) = PATTERN_3.captures(name) {
        return build_parsed(&caps, None);
    }
    None
}

fn build_parsed(caps: &regex::Captures, submodel: Option<String>) -> Option<ParsedFilename> {
    let family = caps.name("family")?.as_str().to_string();
    let size_params: f64 = caps.name("size")?.as_str().parse().ok()?;
    let quant_token = caps.name("quant")?.as_str().to_uppercase();
    let quantization = Quantization::parse(&quant_token)?;
    let kind = caps.name("kind").map(|m| m.as_str().to_lowercase());
    Some(ParsedFilename {
        family,
        variant: caps.name("variant").map(|m| m.as_str().to_string()),
        version: caps.name("version").map(|m| m.as_str().to_string()),
        submodel,
        size_params,
        quantization,
        is_instruct: matches!(kind.as_deref(), Some("instruct") | Some("chat")),
        is_coder: matches!(kind.as_deref(), Some("coder")),
    })
}

fn is_thinking_model(filename: &str, parsed: &ParsedFilename) -> bool {
    let haystack = filename.to_lowercase();
    if THINKING_KEYWORDS.iter().any(|kw| haystack.contains(kw)) {
        return true;
    }
    for field in [parsed.variant.as_deref(), parsed.submodel.as_deref()] {
        if let Some(value) = field {
            let lowered = value.to_lowercase();
            if THINKING_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
                return true;
            }
        }
    }
    false
}

/// Tier rule, first match wins (spec §4.1).
fn assign_tier(
    parsed: &ParsedFilename,
    thinking: bool,
    powerful_threshold: f64,
    fast_threshold: f64,
) -> ModelTier {
    if thinking {
        return ModelTier::Powerful;
    }
    if parsed.size_params >= powerful_threshold {
        return ModelTier::Powerful;
    }
    if parsed.size_params < fast_threshold && parsed.quantization.is_low_quant() {
        return ModelTier::Fast;
    }
    ModelTier::Balanced
}

fn format_size(size: f64) -> String {
    let formatted = if size.fract() == 0.0 {
        format!("{size:.1}")
    } else {
        format!("{size}")
    };
    formatted.replace('.', "p")
}

fn clean_component(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

fn generate_model_id(parsed: &ParsedFilename, tier: ModelTier) -> String {
    let mut parts = vec![clean_component(&parsed.family)];
    if let Some(variant) = &parsed.variant {
        parts.push(clean_component(variant));
    }
    if let Some(version) = &parsed.version {
        parts.push(clean_component(version));
    }
    let size_token = format!("{}b", format_size(parsed.size_params));
    parts.push(size_token);
    parts.push(clean_component(parsed.quantization.as_token()));
    parts.push(tier.to_string().to_lowercase());
    parts.join("_")
}

fn to_discovered_model(path: &Path, parsed: ParsedFilename, powerful_threshold: f64, fast_threshold: f64) -> DiscoveredModel {
    let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let thinking = is_thinking_model(filename, &parsed);
    let tier = assign_tier(&parsed, thinking, powerful_threshold, fast_threshold);
    let model_id = generate_model_id(&parsed, tier);
    DiscoveredModel {
        model_id,
        file_path: path.to_path_buf(),
        family: parsed.family.clone(),
        variant: parsed.variant.clone(),
        version: parsed.version.clone(),
        size_params: parsed.size_params,
        quantization: parsed.quantization,
        assigned_tier: tier,
        tier_override: None,
        thinking_override: None,
        enabled: true,
        port: None,
        runtime: RuntimeOverrides::default(),
        is_thinking_model: thinking,
        is_instruct: parsed.is_instruct,
        is_coder: parsed.is_coder,
    }
}

fn sort_key(model: &DiscoveredModel) -> (u8, i64, String) {
    let tier_rank = match model.assigned_tier {
        ModelTier::Powerful => 0,
        ModelTier::Balanced => 1,
        ModelTier::Fast => 2,
    };
    let size_rank = -(model.size_params * 1000.0) as i64;
    (tier_rank, size_rank, model.quantization.as_token().to_string())
}

/// Walks `scan_root` recursively and builds a fresh registry (spec §4.1).
pub fn discover(
    scan_root: &Path,
    port_range: (u16, u16),
    powerful_threshold: f64,
    fast_threshold: f64,
) -> OrchestratorResult<ModelRegistry> {
    if !scan_root.exists() {
        return Err(OrchestratorError::Discovery(format!(
            "scan root does not exist: {}",
            scan_root.display()
        )));
    }

    let mut models = Vec::new();
    for entry in walk_gguf_files(scan_root)? {
        let filename = match entry.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };
        match parse_filename(filename) {
            Some(parsed) => {
                models.push(to_discovered_model(&entry, parsed, powerful_threshold, fast_threshold));
            }
            None => {
                warn!(file = %entry.display(), "unparseable model filename, skipping");
            }
        }
    }

    models.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));

    let mut registry = ModelRegistry::new(scan_root.to_path_buf(), port_range);
    registry.tier_thresholds.powerful_min = powerful_threshold;
    registry.tier_thresholds.fast_max = fast_threshold;

    let mut next_port = port_range.0;
    for mut model in models {
        if next_port <= port_range.1 {
            model.port = Some(next_port);
            next_port += 1;
        } else {
            warn!(model_id = %model.model_id, "port range exhausted, model left portless");
        }
        registry.models.insert(model.model_id.clone(), model);
    }

    Ok(registry)
}

fn walk_gguf_files(root: &Path) -> OrchestratorResult<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "unreadable directory, skipping");
                continue;
            }
        };
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "unreadable directory entry, skipping");
                    continue;
                }
            };
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some("gguf") {
                out.push(path);
            }
        }
    }
    Ok(out)
}

/// Rescans `scan_root` and preserves user overrides from `existing` for any
/// model_id present in both (spec §4.1, testable property in §8).
pub fn rescan_and_update(
    existing: &ModelRegistry,
    scan_root: &Path,
    powerful_threshold: f64,
    fast_threshold: f64,
) -> OrchestratorResult<ModelRegistry> {
    let mut fresh = discover(scan_root, existing.port_range, powerful_threshold, fast_threshold)?;
    for (model_id, model) in fresh.models.iter_mut() {
        if let Some(prev) = existing.models.get(model_id) {
            model.tier_override = prev.tier_override;
            model.thinking_override = prev.thinking_override;
            model.enabled = prev.enabled;
        }
    }
    Ok(fresh)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_1_parses_lowercase_simple_form() {
        let parsed = parse_filename("llama3-8b-instruct-q4_k_m.gguf").unwrap();
        assert_eq!(parsed.family, "llama");
        assert_eq!(parsed.version.as_deref(), Some("3"));
        assert_eq!(parsed.size_params, 8.0);
        assert_eq!(parsed.quantization, Quantization::Q4KM);
        assert!(parsed.is_instruct);
    }

    #[test]
    fn pattern_3_parses_simple_form() {
        let parsed = parse_filename("mistral-7b-q8_0.gguf").unwrap();
        assert_eq!(parsed.family, "mistral");
        assert_eq!(parsed.size_params, 7.0);
        assert_eq!(parsed.quantization, Quantization::Q80);
    }

    #[test]
    fn unknown_quantization_token_is_rejected() {
        assert!(parse_filename("llama3-8b-q9_zzz.gguf").is_none());
    }

    #[test]
    fn thinking_keyword_forces_powerful_tier() {
        let parsed = parse_filename("deepseek-r1-7b-q4_k_m.gguf").unwrap();
        let thinking = is_thinking_model("deepseek-r1-7b-q4_k_m.gguf", &parsed);
        assert!(thinking);
        assert_eq!(assign_tier(&parsed, thinking, 14.0, 7.0), ModelTier::Powerful);
    }

    #[test]
    fn large_size_is_powerful_regardless_of_quant() {
        let parsed = parse_filename("llama3-70b-q4_k_m.gguf").unwrap();
        assert_eq!(assign_tier(&parsed, false, 14.0, 7.0), ModelTier::Powerful);
    }

    #[test]
    fn small_low_quant_is_fast() {
        let parsed = parse_filename("llama3-3b-q4_0.gguf").unwrap();
        assert_eq!(assign_tier(&parsed, false, 14.0, 7.0), ModelTier::Fast);
    }

    #[test]
    fn mid_size_high_quant_is_balanced() {
        let parsed = parse_filename("llama3-8b-q8_0.gguf").unwrap();
        assert_eq!(assign_tier(&parsed, false, 14.0, 7.0), ModelTier::Balanced);
    }

    #[test]
    fn model_id_uses_p_for_decimal_point() {
        let parsed = parse_filename("llama3-7.5b-q4_k_m.gguf").unwrap();
        let id = generate_model_id(&parsed, ModelTier::Balanced);
        assert!(id.contains("7p5b"));
    }

    #[test]
    fn rescan_preserves_overrides() {
        use tempfile::tempdir;

        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("llama3-8b-q4_k_m.gguf"), b"").unwrap();

        let mut existing = discover(dir.path(), (8100, 8199), 14.0, 7.0).unwrap();
        let model_id = existing.models.keys().next().unwrap().clone();
        existing.models.get_mut(&model_id).unwrap().enabled = false;
        existing.models.get_mut(&model_id).unwrap().tier_override = Some(ModelTier::Powerful);

        let rescanned = rescan_and_update(&existing, dir.path(), 14.0, 7.0).unwrap();
        let model = rescanned.models.get(&model_id).unwrap();
        assert!(!model.enabled);
        assert_eq!(model.tier_override, Some(ModelTier::Powerful));
    }
}

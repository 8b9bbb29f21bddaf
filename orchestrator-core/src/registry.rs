//! Registry persistence: atomic single-JSON-document writes (spec §4.1, §6, §9).

use crate::error::{OrchestratorError, OrchestratorResult};
use orchestrator_types::{InstanceStore, ModelRegistry};
use std::path::Path;
use tracing::info;

/// Loads the registry from `path`. A load that fails schema validation is
/// rejected outright rather than silently corrupting state (spec §9).
pub fn load(path: &Path) -> OrchestratorResult<ModelRegistry> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| OrchestratorError::Registry(format!("registry failed schema validation: {e}")))
}

/// Writes `registry` atomically: serialize to a temp file in the same
/// directory, then rename over the destination.
pub fn save(registry: &ModelRegistry, path: &Path) -> OrchestratorResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(registry)?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    info!(path = %path.display(), model_count = registry.models.len(), "registry persisted");
    Ok(())
}

/// Loads the instance store from `path`, analogous to `load` for the registry (spec §6).
pub fn load_instances(path: &Path) -> OrchestratorResult<InstanceStore> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| OrchestratorError::Registry(format!("instance store failed schema validation: {e}")))
}

/// Writes the instance store atomically, analogous to `save` for the registry.
pub fn save_instances(store: &InstanceStore, path: &Path) -> OrchestratorResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(store)?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    info!(path = %path.display(), instance_count = store.instances.len(), "instance store persisted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_types::ModelRegistry;
    use std::path::PathBuf;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let registry = ModelRegistry::new(PathBuf::from("/models"), (8100, 8199));

        save(&registry, &path).unwrap();
        let loaded = load(&path).unwrap();

        assert_eq!(loaded.scan_path, registry.scan_path);
        assert_eq!(loaded.port_range, registry.port_range);
        assert_eq!(loaded.models.len(), registry.models.len());
    }

    #[test]
    fn malformed_json_is_rejected_not_silently_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, "{not valid json").unwrap();

        assert!(load(&path).is_err());
    }

    #[test]
    fn instance_store_save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instances.json");
        let mut store = InstanceStore::new((9100, 9199));
        store.instances.insert(
            "llama_3_8b:01".to_string(),
            orchestrator_types::InstanceConfig {
                instance_id: "llama_3_8b:01".to_string(),
                base_model_id: "llama_3_8b".to_string(),
                instance_number: 1,
                display_name: "First".to_string(),
                system_prompt: None,
                web_search_enabled: false,
                port: 9100,
                status: orchestrator_types::InstanceStatus::Stopped,
            },
        );

        save_instances(&store, &path).unwrap();
        let loaded = load_instances(&path).unwrap();

        assert_eq!(loaded.port_range, store.port_range);
        assert_eq!(loaded.instances.len(), 1);
    }
}

//! Round-trip and rescan invariants from spec §8.

use orchestrator_core::discovery::{discover, rescan_and_update};
use orchestrator_core::registry::{load, save};
use orchestrator_types::ModelTier;

#[test]
fn save_then_load_preserves_every_discovered_model() {
    let scan_dir = tempfile::tempdir().unwrap();
    std::fs::write(scan_dir.path().join("llama3-8b-instruct-q4_k_m.gguf"), b"").unwrap();
    std::fs::write(scan_dir.path().join("mistral-7b-q8_0.gguf"), b"").unwrap();

    let registry = discover(scan_dir.path(), (8100, 8199), 14.0, 7.0).unwrap();

    let registry_dir = tempfile::tempdir().unwrap();
    let path = registry_dir.path().join("registry.json");
    save(&registry, &path).unwrap();
    let reloaded = load(&path).unwrap();

    assert_eq!(reloaded.models.len(), registry.models.len());
    for (model_id, model) in &registry.models {
        let reloaded_model = reloaded.models.get(model_id).expect("model survives round-trip");
        assert_eq!(reloaded_model.assigned_tier, model.assigned_tier);
        assert_eq!(reloaded_model.port, model.port);
    }
}

#[test]
fn rescan_keeps_user_overrides_and_discover_is_deterministic() {
    let scan_dir = tempfile::tempdir().unwrap();
    std::fs::write(scan_dir.path().join("llama3-8b-instruct-q4_k_m.gguf"), b"").unwrap();

    let first = discover(scan_dir.path(), (8100, 8199), 14.0, 7.0).unwrap();
    let second = discover(scan_dir.path(), (8100, 8199), 14.0, 7.0).unwrap();
    let first_ids: std::collections::BTreeSet<_> = first.models.keys().collect();
    let second_ids: std::collections::BTreeSet<_> = second.models.keys().collect();
    assert_eq!(first_ids, second_ids, "discovery must be deterministic on unchanged input");

    let mut existing = first;
    let model_id = existing.models.keys().next().unwrap().clone();
    existing.models.get_mut(&model_id).unwrap().enabled = false;
    existing.models.get_mut(&model_id).unwrap().tier_override = Some(ModelTier::Fast);

    std::fs::write(scan_dir.path().join("mistral-7b-q8_0.gguf"), b"").unwrap();
    let rescanned = rescan_and_update(&existing, scan_dir.path(), 14.0, 7.0).unwrap();

    let preserved = rescanned.models.get(&model_id).unwrap();
    assert!(!preserved.enabled);
    assert_eq!(preserved.tier_override, Some(ModelTier::Fast));
    assert_eq!(rescanned.models.len(), 2);
}

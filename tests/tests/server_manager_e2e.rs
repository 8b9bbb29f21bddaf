//! Server Manager lifecycle scenarios from spec §8, §4.2, using a fake
//! `llama-server` binary (a shell script) instead of a real inference engine.

use orchestrator_core::config::ServerConfig;
use orchestrator_core::server_manager::ServerManager;
use orchestrator_types::{DiscoveredModel, ModelTier, Quantization, RuntimeOverrides, ServerKey};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

fn write_fake_binary(dir: &std::path::Path, name: &str, script: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, script).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path.to_string_lossy().to_string()
}

fn model(model_id: &str, port: u16) -> DiscoveredModel {
    DiscoveredModel {
        model_id: model_id.to_string(),
        file_path: PathBuf::from("/models/fake.gguf"),
        family: "fake".into(),
        variant: None,
        version: None,
        size_params: 7.0,
        quantization: Quantization::Q4KM,
        assigned_tier: ModelTier::Fast,
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

#[tokio::test]
async fn readiness_abort_on_critical_stderr_pattern() {
    let dir = tempfile::tempdir().unwrap();
    let binary_path = write_fake_binary(
        &dir,
        "fake-llama-server",
        "#!/bin/sh\necho 'error loading model: bad gguf header' 1>&2\nsleep 5\n",
    );

    let config = ServerConfig {
        binary_path,
        max_startup_time_secs: 5,
        ..ServerConfig::default()
    };
    let manager = ServerManager::new(config);

    let result = manager
        .start(ServerKey::Base("fake-model".to_string()), model("fake-model", 18100))
        .await;

    assert!(result.is_err(), "critical stderr pattern must fail startup");
    assert!(manager.get(&ServerKey::Base("fake-model".to_string())).await.is_none());
}

#[tokio::test]
async fn start_is_idempotent_and_stop_removes_tracking() {
    let dir = tempfile::tempdir().unwrap();
    let binary_path = write_fake_binary(
        &dir,
        "fake-llama-server",
        "#!/bin/sh\necho 'HTTP server listening on port' 1>&2\nsleep 30\n",
    );

    let config = ServerConfig {
        binary_path,
        max_startup_time_secs: 5,
        ..ServerConfig::default()
    };
    let manager = ServerManager::new(config);
    let key = ServerKey::Base("fake-model".to_string());

    let first = manager.start(key.clone(), model("fake-model", 18101)).await.unwrap();
    let second = manager.start(key.clone(), model("fake-model", 18101)).await.unwrap();
    assert_eq!(first.port, second.port);
    assert!(first.is_ready);

    manager.stop(key.clone(), Duration::from_secs(1)).await.unwrap();
    assert!(manager.get(&key).await.is_none());
}

#[tokio::test]
async fn stop_sends_graceful_termination_before_force_kill() {
    let dir = tempfile::tempdir().unwrap();
    let binary_path = write_fake_binary(
        &dir,
        "fake-llama-server",
        "#!/bin/sh\ntrap 'echo graceful-exit; exit 0' TERM\necho 'HTTP server listening on port' 1>&2\nwhile true; do sleep 1; done\n",
    );

    let config = ServerConfig {
        binary_path,
        max_startup_time_secs: 5,
        ..ServerConfig::default()
    };
    let manager = ServerManager::new(config);
    let key = ServerKey::Base("fake-model".to_string());

    manager.start(key.clone(), model("fake-model", 18103)).await.unwrap();
    manager.stop(key.clone(), Duration::from_secs(5)).await.unwrap();
    assert!(manager.get(&key).await.is_none());
}

#[tokio::test]
async fn missing_binary_reports_precise_error() {
    let config = ServerConfig {
        binary_path: "/no/such/inference-binary".to_string(),
        ..ServerConfig::default()
    };
    let manager = ServerManager::new(config);
    let result = manager
        .start(ServerKey::Base("fake-model".to_string()), model("fake-model", 18102))
        .await;
    assert!(result.is_err());
}

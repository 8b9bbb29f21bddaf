//! Instance Manager (spec §4.11).
//!
//! Persisted alongside the model registry: every mutation (create/start/stop/
//! delete) is followed by an atomic write of the full instance store, mirroring
//! `registry::save`'s write-temp-then-rename discipline (spec §4.11, §6).

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::registry;
use crate::server_manager::ServerManager;
use orchestrator_types::{InstanceConfig, InstanceStatus, InstanceStore, ModelRegistry, ServerKey};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

const MIN_INSTANCE_NUMBER: u8 = 1;
const MAX_INSTANCE_NUMBER: u8 = 99;

pub struct InstanceManager {
    registry: Arc<RwLock<ModelRegistry>>,
    server_manager: Arc<ServerManager>,
    instances: Arc<RwLock<Vec<InstanceConfig>>>,
    instance_port_range: (u16, u16),
    store_path: Option<PathBuf>,
}

impl InstanceManager {
    pub fn new(
        registry: Arc<RwLock<ModelRegistry>>,
        server_manager: Arc<ServerManager>,
        instance_port_range: (u16, u16),
    ) -> Self {
        Self {
            registry,
            server_manager,
            instances: Arc::new(RwLock::new(Vec::new())),
            instance_port_range,
            store_path: None,
        }
    }

    /// Loads an existing instance store from `store_path` (if present) and
    /// wires the manager to persist every subsequent mutation there.
    pub async fn load(
        registry: Arc<RwLock<ModelRegistry>>,
        server_manager: Arc<ServerManager>,
        store_path: PathBuf,
        default_port_range: (u16, u16),
    ) -> OrchestratorResult<Self> {
        let (instances, instance_port_range) = if store_path.exists() {
            let store = registry::load_instances(&store_path)?;
            (store.instances.into_values().collect(), store.port_range)
        } else {
            (Vec::new(), default_port_range)
        };
        Ok(Self {
            registry,
            server_manager,
            instances: Arc::new(RwLock::new(instances)),
            instance_port_range,
            store_path: Some(store_path),
        })
    }

    async fn persist(&self) -> OrchestratorResult<()> {
        let Some(path) = &self.store_path else {
            return Ok(());
        };
        let instances = self.instances.read().await;
        let mut store = InstanceStore::new(self.instance_port_range);
        for instance in instances.iter() {
            store.instances.insert(instance.instance_id.clone(), instance.clone());
        }
        registry::save_instances(&store, path)
    }

    pub async fn list(&self) -> Vec<InstanceConfig> {
        self.instances.read().await.clone()
    }

    pub async fn create(
        &self,
        base_model_id: &str,
        display_name: &str,
        system_prompt: Option<String>,
        web_search_enabled: bool,
    ) -> OrchestratorResult<InstanceConfig> {
        {
            let registry = self.registry.read().await;
            if !registry.models.contains_key(base_model_id) {
                return Err(OrchestratorError::Instance(format!(
                    "base model {base_model_id} does not exist"
                )));
            }
        }

        let mut instances = self.instances.write().await;

        let used_numbers: Vec<u8> = instances
            .iter()
            .filter(|i| i.base_model_id == base_model_id)
            .map(|i| i.instance_number)
            .collect();
        let instance_number = (MIN_INSTANCE_NUMBER..=MAX_INSTANCE_NUMBER)
            .find(|n| !used_numbers.contains(n))
            .ok_or_else(|| {
                OrchestratorError::Instance(format!(
                    "no free instance numbers remain for {base_model_id}"
                ))
            })?;

        let used_ports: Vec<u16> = instances.iter().map(|i| i.port).collect();
        let port = (self.instance_port_range.0..=self.instance_port_range.1)
            .find(|p| !used_ports.contains(p))
            .ok_or_else(|| {
                OrchestratorError::Instance("no free ports remain in the instance range".to_string())
            })?;

        let instance = InstanceConfig {
            instance_id: InstanceConfig::format_instance_id(base_model_id, instance_number),
            base_model_id: base_model_id.to_string(),
            instance_number,
            display_name: display_name.to_string(),
            system_prompt,
            web_search_enabled,
            port,
            status: InstanceStatus::Stopped,
        };
        instances.push(instance.clone());
        drop(instances);
        self.persist().await?;
        Ok(instance)
    }

    pub async fn start(&self, instance_id: &str) -> OrchestratorResult<()> {
        let model = {
            let mut instances = self.instances.write().await;
            let instance = instances
                .iter_mut()
                .find(|i| i.instance_id == instance_id)
                .ok_or_else(|| OrchestratorError::Instance(format!("instance {instance_id} not found")))?;
            instance.status = InstanceStatus::Starting;

            let registry = self.registry.read().await;
            let mut model = registry
                .models
                .get(&instance.base_model_id)
                .cloned()
                .ok_or_else(|| {
                    OrchestratorError::Instance(format!("base model {} missing", instance.base_model_id))
                })?;
            model.port = Some(instance.port);
            model
        };

        let result = self
            .server_manager
            .start(ServerKey::Instance(instance_id.to_string()), model)
            .await;

        let mut instances = self.instances.write().await;
        if let Some(instance) = instances.iter_mut().find(|i| i.instance_id == instance_id) {
            instance.status = match &result {
                Ok(_) => InstanceStatus::Active,
                Err(_) => InstanceStatus::Error,
            };
        }
        drop(instances);
        self.persist().await?;
        result.map(|_| ())
    }

    pub async fn stop(&self, instance_id: &str) -> OrchestratorResult<()> {
        {
            let mut instances = self.instances.write().await;
            let instance = instances
                .iter_mut()
                .find(|i| i.instance_id == instance_id)
                .ok_or_else(|| OrchestratorError::Instance(format!("instance {instance_id} not found")))?;
            instance.status = InstanceStatus::Stopping;
        }

        self.server_manager
            .stop(ServerKey::Instance(instance_id.to_string()), Duration::from_secs(10))
            .await?;

        let mut instances = self.instances.write().await;
        if let Some(instance) = instances.iter_mut().find(|i| i.instance_id == instance_id) {
            instance.status = InstanceStatus::Stopped;
        }
        drop(instances);
        self.persist().await?;
        Ok(())
    }

    /// Deletes an instance; requires it to already be stopped (spec §4.11).
    pub async fn delete(&self, instance_id: &str) -> OrchestratorResult<()> {
        let mut instances = self.instances.write().await;
        let index = instances
            .iter()
            .position(|i| i.instance_id == instance_id)
            .ok_or_else(|| OrchestratorError::Instance(format!("instance {instance_id} not found")))?;
        if instances[index].status != InstanceStatus::Stopped {
            return Err(OrchestratorError::Instance(format!(
                "instance {instance_id} must be stopped before deletion"
            )));
        }
        instances.remove(index);
        drop(instances);
        self.persist().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::path::PathBuf;

    fn registry_with_model(model_id: &str) -> ModelRegistry {
        let mut registry = ModelRegistry::new(PathBuf::from("/models"), (8100, 8199));
        registry.models.insert(
            model_id.to_string(),
            orchestrator_types::DiscoveredModel {
                model_id: model_id.to_string(),
                file_path: PathBuf::from(format!("/models/{model_id}.gguf")),
                family: "test".into(),
                variant: None,
                version: None,
                size_params: 7.0,
                quantization: orchestrator_types::Quantization::Q4KM,
                assigned_tier: orchestrator_types::ModelTier::Balanced,
                tier_override: None,
                thinking_override: None,
                enabled: true,
                port: Some(8100),
                runtime: orchestrator_types::RuntimeOverrides::default(),
                is_thinking_model: false,
                is_instruct: true,
                is_coder: false,
            },
        );
        registry
    }

    #[tokio::test]
    async fn create_rejects_unknown_base_model() {
        let registry = Arc::new(RwLock::new(ModelRegistry::new(PathBuf::from("/models"), (8100, 8199))));
        let server_manager = Arc::new(ServerManager::new(ServerConfig::default()));
        let manager = InstanceManager::new(registry, server_manager, (9100, 9199));
        let result = manager.create("missing", "Display", None, false).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn create_allocates_sequential_instance_numbers() {
        let registry = Arc::new(RwLock::new(registry_with_model("llama_3_8b")));
        let server_manager = Arc::new(ServerManager::new(ServerConfig::default()));
        let manager = InstanceManager::new(registry, server_manager, (9100, 9199));

        let first = manager.create("llama_3_8b", "First", None, false).await.unwrap();
        let second = manager.create("llama_3_8b", "Second", None, false).await.unwrap();
        assert_eq!(first.instance_number, 1);
        assert_eq!(second.instance_number, 2);
        assert_ne!(first.port, second.port);
    }

    #[tokio::test]
    async fn delete_requires_stopped_status() {
        let registry = Arc::new(RwLock::new(registry_with_model("llama_3_8b")));
        let server_manager = Arc::new(ServerManager::new(ServerConfig::default()));
        let manager = InstanceManager::new(registry, server_manager, (9100, 9199));
        let instance = manager.create("llama_3_8b", "First", None, false).await.unwrap();

        {
            let mut instances = manager.instances.write().await;
            instances[0].status = InstanceStatus::Active;
        }
        assert!(manager.delete(&instance.instance_id).await.is_err());
    }

    #[tokio::test]
    async fn instances_persist_across_manager_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store_path = dir.path().join("instances.json");

        let registry = Arc::new(RwLock::new(registry_with_model("llama_3_8b")));
        let server_manager = Arc::new(ServerManager::new(ServerConfig::default()));
        let manager = InstanceManager::load(registry.clone(), server_manager.clone(), store_path.clone(), (9100, 9199))
            .await
            .unwrap();
        let created = manager.create("llama_3_8b", "First", None, false).await.unwrap();

        let reloaded = InstanceManager::load(registry, server_manager, store_path, (9100, 9199))
            .await
            .unwrap();
        let listed = reloaded.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].instance_id, created.instance_id);
    }
}

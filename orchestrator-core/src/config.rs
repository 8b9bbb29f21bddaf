//! Orchestrator configuration.

use crate::error::{OrchestratorError, OrchestratorResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the orchestrator core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub instances: InstancesConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            discovery: DiscoveryConfig::default(),
            server: ServerConfig::default(),
            metrics: MetricsConfig::default(),
            instances: InstancesConfig::default(),
        }
    }
}

/// Instance Manager configuration (spec §4.11, §6 "Instance file format").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstancesConfig {
    /// Path the instance store is persisted to, alongside the model registry.
    #[serde(default = "InstancesConfig::default_store_path")]
    pub store_path: String,
    /// Inclusive port range assigned to instances; distinct from the model registry's.
    #[serde(default = "InstancesConfig::default_port_range")]
    pub port_range: (u16, u16),
}

impl Default for InstancesConfig {
    fn default() -> Self {
        Self {
            store_path: Self::default_store_path(),
            port_range: Self::default_port_range(),
        }
    }
}

impl InstancesConfig {
    fn default_store_path() -> String {
        "~/.local/share/orchestrator/instances.json".to_string()
    }

    fn default_port_range() -> (u16, u16) {
        (9100, 9199)
    }
}

/// Model discovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Directories scanned recursively for `.gguf` files.
    #[serde(default = "DiscoveryConfig::default_model_dirs")]
    pub model_dirs: Vec<String>,
    /// Path the model registry is persisted to.
    #[serde(default = "DiscoveryConfig::default_registry_path")]
    pub registry_path: String,
    /// Size threshold (billions of params) at or above which a model is POWERFUL.
    #[serde(default = "DiscoveryConfig::default_powerful_threshold")]
    pub powerful_threshold: f64,
    /// Size threshold (billions of params) below which a model may be FAST.
    #[serde(default = "DiscoveryConfig::default_fast_threshold")]
    pub fast_threshold: f64,
    /// Inclusive port range assigned to discovered models, in registry order.
    #[serde(default = "DiscoveryConfig::default_port_range")]
    pub port_range: (u16, u16),
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            model_dirs: Self::default_model_dirs(),
            registry_path: Self::default_registry_path(),
            powerful_threshold: Self::default_powerful_threshold(),
            fast_threshold: Self::default_fast_threshold(),
            port_range: Self::default_port_range(),
        }
    }
}

impl DiscoveryConfig {
    fn default_model_dirs() -> Vec<String> {
        vec!["~/models".to_string()]
    }

    fn default_registry_path() -> String {
        "~/.local/share/orchestrator/registry.json".to_string()
    }

    fn default_powerful_threshold() -> f64 {
        30.0
    }

    fn default_fast_threshold() -> f64 {
        7.0
    }

    fn default_port_range() -> (u16, u16) {
        (8100, 8199)
    }
}

/// Server lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the inference server binary.
    #[serde(default = "ServerConfig::default_binary_path")]
    pub binary_path: String,
    /// Host the spawned servers bind to.
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,
    /// Maximum seconds to wait for readiness before failing startup.
    #[serde(default = "ServerConfig::default_max_startup_time")]
    pub max_startup_time_secs: u64,
    /// Interval between readiness polls, in seconds.
    #[serde(default = "ServerConfig::default_readiness_check_interval")]
    pub readiness_check_interval_secs: u64,
    /// When true, `start_server` probes an externally managed server instead
    /// of spawning a child process.
    #[serde(default)]
    pub use_external_servers: bool,
    #[serde(default)]
    pub runtime: RuntimeDefaults,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            binary_path: Self::default_binary_path(),
            host: Self::default_host(),
            max_startup_time_secs: Self::default_max_startup_time(),
            readiness_check_interval_secs: Self::default_readiness_check_interval(),
            use_external_servers: false,
            runtime: RuntimeDefaults::default(),
        }
    }
}

impl ServerConfig {
    fn default_binary_path() -> String {
        "/usr/local/bin/llama-server".to_string()
    }

    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    fn default_max_startup_time() -> u64 {
        120
    }

    fn default_readiness_check_interval() -> u64 {
        2
    }
}

/// Global runtime defaults, overridable per model/instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeDefaults {
    #[serde(default = "RuntimeDefaults::default_n_gpu_layers")]
    pub n_gpu_layers: i32,
    #[serde(default = "RuntimeDefaults::default_ctx_size")]
    pub ctx_size: u32,
    #[serde(default = "RuntimeDefaults::default_n_threads")]
    pub n_threads: u32,
    #[serde(default = "RuntimeDefaults::default_batch_size")]
    pub batch_size: u32,
    #[serde(default)]
    pub flash_attn: bool,
    #[serde(default)]
    pub no_mmap: bool,
}

impl Default for RuntimeDefaults {
    fn default() -> Self {
        Self {
            n_gpu_layers: Self::default_n_gpu_layers(),
            ctx_size: Self::default_ctx_size(),
            n_threads: Self::default_n_threads(),
            batch_size: Self::default_batch_size(),
            flash_attn: false,
            no_mmap: false,
        }
    }
}

impl RuntimeDefaults {
    fn default_n_gpu_layers() -> i32 {
        -1
    }

    fn default_ctx_size() -> u32 {
        4096
    }

    fn default_n_threads() -> u32 {
        8
    }

    fn default_batch_size() -> u32 {
        512
    }
}

/// Metrics aggregator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "MetricsConfig::default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "MetricsConfig::default_capacity_per_series")]
    pub capacity_per_series: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            retention_secs: Self::default_retention_secs(),
            capacity_per_series: Self::default_capacity_per_series(),
        }
    }
}

impl MetricsConfig {
    fn default_retention_secs() -> u64 {
        30 * 24 * 60 * 60
    }

    fn default_capacity_per_series() -> usize {
        20_000
    }
}

impl AppConfig {
    pub fn load() -> OrchestratorResult<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| OrchestratorError::Validation(format!("failed to parse config: {e}")))?;
        Ok(config)
    }

    pub fn save(&self) -> OrchestratorResult<()> {
        let config_path = Self::config_path()?;
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| OrchestratorError::Validation(format!("failed to serialize config: {e}")))?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> OrchestratorResult<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| OrchestratorError::Validation("cannot determine home directory".into()))?;
        Ok(home.join(".config").join("orchestrator").join("config.toml"))
    }

    pub fn expand_path(path: &str) -> OrchestratorResult<PathBuf> {
        if let Some(rest) = path.strip_prefix("~/") {
            let home = dirs::home_dir()
                .ok_or_else(|| OrchestratorError::Validation("cannot determine home directory".into()))?;
            Ok(home.join(rest))
        } else if let Some(rest) = path.strip_prefix('~') {
            let home = dirs::home_dir()
                .ok_or_else(|| OrchestratorError::Validation("cannot determine home directory".into()))?;
            Ok(home.join(rest.trim_start_matches('/')))
        } else {
            Ok(PathBuf::from(path))
        }
    }

    pub fn registry_path(&self) -> OrchestratorResult<PathBuf> {
        Self::expand_path(&self.discovery.registry_path)
    }

    pub fn model_dirs(&self) -> OrchestratorResult<Vec<PathBuf>> {
        self.discovery
            .model_dirs
            .iter()
            .map(|p| Self::expand_path(p))
            .collect()
    }

    pub fn instances_path(&self) -> OrchestratorResult<PathBuf> {
        Self::expand_path(&self.instances.store_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_thresholds() {
        let config = AppConfig::default();
        assert!(config.discovery.powerful_threshold > config.discovery.fast_threshold);
        assert_eq!(config.discovery.port_range.0, 8100);
    }

    #[test]
    fn tilde_path_expansion() {
        let expanded = AppConfig::expand_path("~/models").unwrap();
        assert!(!expanded.to_string_lossy().contains('~'));
        assert!(expanded.to_string_lossy().ends_with("models"));
    }

    #[test]
    fn absolute_path_is_unchanged() {
        let expanded = AppConfig::expand_path("/srv/models").unwrap();
        assert_eq!(expanded, PathBuf::from("/srv/models"));
    }
}

//! Server-lifecycle and instance types (spec §3, §4.2, §4.11).

use crate::models::DiscoveredModel;
use serde::{Deserialize, Serialize};

/// One running (or externally-attached) inference process.
#[derive(Debug, Clone)]
pub struct ServerProcess {
    pub model: DiscoveredModel,
    pub port: u16,
    pub pid: Option<u32>,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub is_ready: bool,
    pub is_external: bool,
}

impl ServerProcess {
    pub fn uptime(&self) -> chrono::Duration {
        chrono::Utc::now() - self.start_time
    }

    /// Snapshot suitable for operator-facing status queries.
    pub fn status(&self) -> ServerStatusSnapshot {
        ServerStatusSnapshot {
            model_id: self.model.model_id.clone(),
            display_name: self.model.family.clone(),
            port: self.port,
            pid: self.pid,
            is_ready: self.is_ready,
            is_external: self.is_external,
            uptime_seconds: self.uptime().num_seconds().max(0),
            tier: self.model.effective_tier(),
            is_thinking: self.model.effective_thinking(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatusSnapshot {
    pub model_id: String,
    pub display_name: String,
    pub port: u16,
    pub pid: Option<u32>,
    pub is_ready: bool,
    pub is_external: bool,
    pub uptime_seconds: i64,
    pub tier: crate::models::ModelTier,
    pub is_thinking: bool,
}

/// Key under which the Server Manager tracks a running process.
///
/// Instances and base models are given distinct keyspaces so an instance
/// (`<model_id>:NN`) never collides with the model it overlays.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServerKey {
    Base(String),
    Instance(String),
}

impl std::fmt::Display for ServerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerKey::Base(id) => write!(f, "{id}"),
            ServerKey::Instance(id) => write!(f, "{id}"),
        }
    }
}

/// Lifecycle state of a tracked server process (spec §4.2 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServerState {
    Stopped,
    Starting,
    Active,
    Stopping,
    Error,
}

/// Lifecycle state of a named instance overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceStatus {
    Stopped,
    Starting,
    Active,
    Stopping,
    Error,
}

/// A named configuration overlay on a base model (spec §3, §4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceConfig {
    /// Format `<model_id>:NN`, NN in 01..=99.
    pub instance_id: String,
    pub base_model_id: String,
    pub instance_number: u8,
    pub display_name: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub web_search_enabled: bool,
    pub port: u16,
    pub status: InstanceStatus,
}

impl InstanceConfig {
    pub fn format_instance_id(base_model_id: &str, instance_number: u8) -> String {
        format!("{base_model_id}:{instance_number:02}")
    }

    pub fn server_key(&self) -> ServerKey {
        ServerKey::Instance(self.instance_id.clone())
    }
}

/// On-disk document for instance persistence (spec §6 "Instance file format").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStore {
    pub instances: std::collections::HashMap<String, InstanceConfig>,
    pub port_range: (u16, u16),
}

impl InstanceStore {
    pub fn new(port_range: (u16, u16)) -> Self {
        Self {
            instances: std::collections::HashMap::new(),
            port_range,
        }
    }
}

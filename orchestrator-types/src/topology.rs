//! Topology-tracker value types (spec §3, §4.10).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthMetrics {
    pub status: ComponentStatus,
    pub uptime_seconds: i64,
    pub memory_bytes: u64,
    pub cpu_percent: f64,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    pub last_check: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentNode {
    pub component_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentConnection {
    pub from: String,
    pub to: String,
    pub active: bool,
    #[serde(default)]
    pub metadata: HashMap<String, f64>,
}

/// Ordered sequence of components a single query traversed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFlowPath {
    pub query_id: uuid::Uuid,
    pub visits: Vec<DataFlowVisit>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFlowVisit {
    pub component_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl DataFlowPath {
    pub fn new(query_id: uuid::Uuid) -> Self {
        Self {
            query_id,
            visits: Vec::new(),
            created_at: chrono::Utc::now(),
        }
    }

    /// Appends `component_id` unless it is already the most recently visited
    /// component (dedup within a path, per spec §4.10).
    pub fn record(&mut self, component_id: &str) {
        if self.visits.last().map(|v| v.component_id.as_str()) != Some(component_id) {
            self.visits.push(DataFlowVisit {
                component_id: component_id.to_string(),
                timestamp: chrono::Utc::now(),
            });
        }
    }

    pub fn is_expired(&self, ttl: chrono::Duration) -> bool {
        chrono::Utc::now() - self.created_at > ttl
    }
}

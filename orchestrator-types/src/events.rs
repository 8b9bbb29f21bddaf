//! Event Bus wire types (spec §3 `SystemEvent`, §4.8, §6).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Closed set of event kinds the orchestrator emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    QueryRoute,
    ModelState,
    Cgrag,
    Cache,
    Error,
    Performance,
    PipelineStageStart,
    PipelineStageComplete,
    PipelineStageFailed,
    PipelineComplete,
    PipelineFailed,
    TopologyHealthUpdate,
    TopologyDataflowUpdate,
    Log,
    ActionPending,
    AgentStateChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A single event on the in-process bus (spec §3, §6 wire shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemEvent {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub message: String,
    pub severity: Severity,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SystemEvent {
    pub fn new(event_type: EventType, severity: Severity, message: impl Into<String>) -> Self {
        let mut message = message.into();
        message.truncate(1000);
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            message,
            severity,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.metadata.insert(key.into(), v);
        }
        self
    }
}

/// Subscriber-side filter (spec §4.8).
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_types: Option<Vec<EventType>>,
    pub min_severity: Option<Severity>,
}

impl EventFilter {
    pub fn matches(&self, event: &SystemEvent) -> bool {
        if let Some(types) = &self.event_types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }
        if let Some(min) = self.min_severity {
            if event.severity < min {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_is_truncated_to_1000_chars() {
        let long = "x".repeat(2000);
        let event = SystemEvent::new(EventType::Log, Severity::Info, long);
        assert_eq!(event.message.len(), 1000);
    }

    #[test]
    fn severity_ordering_filters_below_threshold() {
        let filter = EventFilter {
            event_types: None,
            min_severity: Some(Severity::Warning),
        };
        let info_event = SystemEvent::new(EventType::Log, Severity::Info, "hi");
        let warn_event = SystemEvent::new(EventType::Log, Severity::Warning, "hi");
        assert!(!filter.matches(&info_event));
        assert!(filter.matches(&warn_event));
    }
}

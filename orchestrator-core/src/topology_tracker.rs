//! Topology Tracker (spec §4.10).
//!
//! Component set mirrors the system overview (spec §2) plus one node per
//! tracked model server, matching `original_source/topology_manager.py`.

use crate::event_bus::EventBus;
use orchestrator_types::{ComponentStatus, DataFlowPath, EventType, HealthMetrics, Severity, SystemEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const HEALTH_LOOP_INTERVAL_SECS: u64 = 10;
const DATA_FLOW_PATH_TTL: chrono::Duration = chrono::Duration::hours(1);
const DATA_FLOW_PATH_CAP: usize = 100;

/// A health probe for one component, pluggable per component kind (process
/// self, Server Manager, retrieval index, cache, event bus).
pub type HealthProbe = Arc<dyn Fn() -> HealthMetrics + Send + Sync>;

struct TrackedComponent {
    display_name: String,
    probe: HealthProbe,
    last_health: Option<HealthMetrics>,
}

pub struct TopologyTracker {
    components: Arc<RwLock<HashMap<String, TrackedComponent>>>,
    flows: Arc<RwLock<HashMap<uuid::Uuid, DataFlowPath>>>,
    event_bus: EventBus,
}

impl TopologyTracker {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            flows: Arc::new(RwLock::new(HashMap::new())),
            event_bus,
        }
    }

    pub async fn register_component(&self, component_id: &str, display_name: &str, probe: HealthProbe) {
        self.components.write().await.insert(
            component_id.to_string(),
            TrackedComponent {
                display_name: display_name.to_string(),
                probe,
                last_health: None,
            },
        );
    }

    /// Probes every registered component once, emitting a
    /// `TopologyHealthUpdate` on each status transition.
    pub async fn run_health_check(&self) {
        let mut components = self.components.write().await;
        for (component_id, component) in components.iter_mut() {
            let new_health = (component.probe)();
            let transitioned = component
                .last_health
                .as_ref()
                .map(|prev| prev.status != new_health.status)
                .unwrap_or(true);

            if transitioned {
                let event = SystemEvent::new(
                    EventType::TopologyHealthUpdate,
                    severity_for(new_health.status),
                    format!("{} health: {:?}", component.display_name, new_health.status),
                )
                .with_metadata("componentId", component_id)
                .with_metadata("before", component.last_health.as_ref().map(|h| h.status))
                .with_metadata("after", new_health.status);
                self.event_bus.publish(event).await;
            }
            component.last_health = Some(new_health);
        }
    }

    /// Spawns the 10-second health loop; cancellable by aborting the handle.
    pub fn spawn_health_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(HEALTH_LOOP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                tracker.run_health_check().await;
            }
        })
    }

    pub async fn health_snapshot(&self) -> HashMap<String, HealthMetrics> {
        self.components
            .read()
            .await
            .iter()
            .filter_map(|(id, c)| c.last_health.clone().map(|h| (id.clone(), h)))
            .collect()
    }

    /// The static node set: one entry per registered component.
    pub async fn nodes(&self) -> Vec<orchestrator_types::ComponentNode> {
        self.components
            .read()
            .await
            .iter()
            .map(|(id, c)| orchestrator_types::ComponentNode {
                component_id: id.clone(),
                display_name: c.display_name.clone(),
            })
            .collect()
    }

    /// Records a query's visit to `component_id`, evicting stale/overflowing
    /// paths (spec §4.10).
    pub async fn record_flow(&self, query_id: uuid::Uuid, component_id: &str) {
        let mut flows = self.flows.write().await;
        flows
            .entry(query_id)
            .or_insert_with(|| DataFlowPath::new(query_id))
            .record(component_id);

        flows.retain(|_, path| !path.is_expired(DATA_FLOW_PATH_TTL));
        while flows.len() > DATA_FLOW_PATH_CAP {
            if let Some(oldest_id) = flows
                .iter()
                .min_by_key(|(_, path)| path.created_at)
                .map(|(id, _)| *id)
            {
                flows.remove(&oldest_id);
            } else {
                break;
            }
        }
    }

    pub async fn flow(&self, query_id: uuid::Uuid) -> Option<DataFlowPath> {
        self.flows.read().await.get(&query_id).cloned()
    }
}

fn severity_for(status: ComponentStatus) -> Severity {
    match status {
        ComponentStatus::Healthy => Severity::Info,
        ComponentStatus::Degraded => Severity::Warning,
        ComponentStatus::Unhealthy | ComponentStatus::Offline => Severity::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn healthy() -> HealthMetrics {
        HealthMetrics {
            status: ComponentStatus::Healthy,
            uptime_seconds: 1,
            memory_bytes: 0,
            cpu_percent: 0.0,
            error_rate: 0.0,
            avg_latency_ms: 0.0,
            last_check: Utc::now(),
        }
    }

    #[tokio::test]
    async fn record_flow_creates_and_dedups_path() {
        let tracker = TopologyTracker::new(EventBus::new());
        let query_id = uuid::Uuid::new_v4();
        tracker.record_flow(query_id, "orchestrator").await;
        tracker.record_flow(query_id, "orchestrator").await;
        tracker.record_flow(query_id, "selector").await;

        let flow = tracker.flow(query_id).await.unwrap();
        assert_eq!(flow.visits.len(), 2);
    }

    #[tokio::test]
    async fn health_check_emits_event_on_transition() {
        let tracker = TopologyTracker::new(EventBus::new());
        let mut sub = tracker
            .event_bus
            .subscribe(orchestrator_types::EventFilter::default())
            .await;
        tracker
            .register_component("core", "Core", Arc::new(healthy))
            .await;
        tracker.run_health_check().await;

        let event = sub.rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::TopologyHealthUpdate);
    }
}

//! Event Bus (spec §4.8).
//!
//! Generalizes the teacher's raw `tokio::sync::broadcast` usage
//! (`ModelManager::status_tx`) with replayed history and slow-subscriber
//! eviction, neither of which a bare broadcast channel gives you.

use orchestrator_types::{EventFilter, EventType, Severity, SystemEvent};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

const DEFAULT_HISTORY_CAPACITY: usize = 50;
const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;
const SLOW_SUBSCRIBER_SEND_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(500);

struct Subscriber {
    filter: EventFilter,
    tx: mpsc::Sender<SystemEvent>,
}

struct Inner {
    history: VecDeque<SystemEvent>,
    history_capacity: usize,
    subscribers: Vec<Subscriber>,
}

/// Bounded-history publish/subscribe bus for `SystemEvent`s.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Inner>>,
}

pub struct EventSubscription {
    pub rx: mpsc::Receiver<SystemEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(history_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                history: VecDeque::with_capacity(history_capacity),
                history_capacity,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Publishes `event`. Non-blocking from the producer's perspective: a
    /// subscriber whose queue is full past the send timeout is dropped.
    pub async fn publish(&self, event: SystemEvent) {
        let mut inner = self.inner.lock().await;
        inner.history.push_back(event.clone());
        while inner.history.len() > inner.history_capacity {
            inner.history.pop_front();
        }

        let mut still_alive = Vec::with_capacity(inner.subscribers.len());
        for subscriber in inner.subscribers.drain(..) {
            if !subscriber.filter.matches(&event) {
                still_alive.push(subscriber);
                continue;
            }
            match tokio::time::timeout(SLOW_SUBSCRIBER_SEND_TIMEOUT, subscriber.tx.send(event.clone())).await {
                Ok(Ok(())) => still_alive.push(subscriber),
                _ => warn!("dropping slow event-bus subscriber"),
            }
        }
        inner.subscribers = still_alive;
    }

    /// Subscribes with `filter`, replaying matching history before live events.
    pub async fn subscribe(&self, filter: EventFilter) -> EventSubscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let mut inner = self.inner.lock().await;
        for event in inner.history.iter().filter(|e| filter.matches(e)) {
            let _ = tx.try_send(event.clone());
        }
        inner.subscribers.push(Subscriber { filter, tx });
        EventSubscription { rx }
    }

    /// Idempotent: clears subscribers so no further events are delivered.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        inner.subscribers.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: EventType, severity: Severity) -> SystemEvent {
        SystemEvent::new(event_type, severity, "message")
    }

    #[tokio::test]
    async fn new_subscriber_receives_history_before_live_events() {
        let bus = EventBus::new();
        bus.publish(event(EventType::ModelState, Severity::Info)).await;

        let mut sub = bus.subscribe(EventFilter::default()).await;
        let replayed = sub.rx.try_recv().expect("history event should be replayed");
        assert_eq!(replayed.event_type, EventType::ModelState);

        bus.publish(event(EventType::PipelineStageStart, Severity::Info)).await;
        let live = sub.rx.recv().await.expect("live event should be delivered");
        assert_eq!(live.event_type, EventType::PipelineStageStart);
    }

    #[tokio::test]
    async fn stop_clears_subscribers() {
        let bus = EventBus::new();
        let sub = bus.subscribe(EventFilter::default()).await;
        bus.stop().await;
        bus.publish(event(EventType::ModelState, Severity::Info)).await;
        assert!(sub.rx.is_empty());
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let bus = EventBus::with_history_capacity(2);
        for _ in 0..5 {
            bus.publish(event(EventType::ModelState, Severity::Info)).await;
        }
        let sub = bus.subscribe(EventFilter::default()).await;
        let mut count = 0;
        while sub.rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn zero_history_capacity_replays_nothing() {
        let bus = EventBus::with_history_capacity(0);
        bus.publish(event(EventType::ModelState, Severity::Info)).await;

        let mut sub = bus.subscribe(EventFilter::default()).await;
        assert!(sub.rx.try_recv().is_err(), "no history should be replayed");

        bus.publish(event(EventType::PipelineStageStart, Severity::Info)).await;
        let live = sub.rx.recv().await.expect("live event should still be delivered");
        assert_eq!(live.event_type, EventType::PipelineStageStart);
    }
}

//! Routes domain events to the registry.
//!
//! [`EventBus`] is the in-process source of [`DomainEvent`]s; an
//! [`EventDispatcher`] drains it and fans each event out to the target
//! user's connections.

use std::sync::Arc;

use livefolio_core::DomainEvent;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::{BroadcastReport, ConnectionRegistry};

/// In-process publisher of domain events.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per receiver.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Returns how many receivers will see it.
    pub fn publish(&self, event: DomainEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// A new receiver that sees events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Stateless adapter from domain events to registry broadcasts.
#[derive(Clone)]
pub struct EventDispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl EventDispatcher {
    /// Dispatch into `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver one event to its target user.
    pub fn dispatch(&self, event: &DomainEvent) -> BroadcastReport {
        let report = self.registry.broadcast(event.target_user_id, event);
        debug!(
            user_id = %event.target_user_id,
            kind = event.kind.as_str(),
            delivered = report.delivered,
            evicted = report.evicted,
            "event dispatched"
        );
        report
    }

    /// Forward every event from `rx` until the bus closes or `shutdown` fires.
    pub async fn run(self, mut rx: broadcast::Receiver<DomainEvent>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("event dispatcher shutting down");
                    break;
                }
                received = rx.recv() => match received {
                    Ok(event) => {
                        let _ = self.dispatch(&event);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "event dispatcher lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("event bus closed");
                        break;
                    }
                },
            }
        }
    }

    /// Spawn [`run`](Self::run) on a new subscription to `bus`.
    pub fn spawn(
        self,
        bus: &EventBus,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let rx = bus.subscribe();
        tokio::spawn(self.run(rx, shutdown))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use livefolio_core::UserId;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::connection::ConnectionHandle;

    fn registry_with(user: i64) -> (Arc<ConnectionRegistry>, mpsc::Receiver<Arc<String>>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, rx) = mpsc::channel(8);
        registry.register(UserId::new(user), Arc::new(ConnectionHandle::new(tx)));
        (registry, rx)
    }

    #[test]
    fn publish_without_receivers_returns_zero() {
        let bus = EventBus::new(4);
        assert_eq!(bus.receiver_count(), 0);
        let event = DomainEvent::investment_update(UserId::new(1), json!({}));
        assert_eq!(bus.publish(event), 0);
    }

    #[tokio::test]
    async fn dispatch_targets_event_user() {
        let (registry, mut rx) = registry_with(42);
        let dispatcher = EventDispatcher::new(registry);

        let hit = DomainEvent::investment_update(UserId::new(42), json!({"investmentId": 7}));
        let miss = DomainEvent::investment_update(UserId::new(43), json!({"investmentId": 8}));
        assert_eq!(dispatcher.dispatch(&hit).delivered, 1);
        assert_eq!(dispatcher.dispatch(&miss).delivered, 0);

        let frame = rx.recv().await.unwrap();
        assert!(frame.contains("\"investmentId\":7"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn run_forwards_bus_events() {
        let (registry, mut rx) = registry_with(5);
        let bus = EventBus::new(16);
        let shutdown = CancellationToken::new();
        let handle = EventDispatcher::new(registry).spawn(&bus, shutdown.clone());

        assert_eq!(
            bus.publish(DomainEvent::investment_update(UserId::new(5), json!({"n": 1}))),
            1
        );
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(frame.contains("\"userId\":5"));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn run_stops_when_bus_closes() {
        let (registry, _rx) = registry_with(5);
        let bus = EventBus::new(4);
        let handle = EventDispatcher::new(registry).spawn(&bus, CancellationToken::new());
        drop(bus);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn run_survives_lag() {
        let (registry, mut rx) = registry_with(5);
        let bus = EventBus::new(1);
        let receiver = bus.subscribe();
        for n in 0..3 {
            let _ = bus.publish(DomainEvent::investment_update(UserId::new(5), json!({"n": n})));
        }
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(EventDispatcher::new(registry).run(receiver, shutdown.clone()));

        // Only the newest event survives the lag.
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(frame.contains("\"n\":2"));

        shutdown.cancel();
        handle.await.unwrap();
    }
}

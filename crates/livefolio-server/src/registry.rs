//! Per-user registry of live connections and targeted fan-out.
//!
//! A connection belongs to at most one user at a time. Registration,
//! removal and eviction all happen under one lock, so a broadcast never
//! observes a half-moved connection.

use std::collections::HashMap;
use std::sync::Arc;

use livefolio_core::{ConnectionId, DomainEvent, UserId, encode};
use metrics::counter;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::connection::ConnectionHandle;
use crate::error::SendError;
use crate::metrics::{BROADCASTS_TOTAL, DELIVERIES_TOTAL, EVICTIONS_TOTAL};

/// Outcome of one [`ConnectionRegistry::broadcast`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the frame was queued on.
    pub delivered: usize,
    /// Connections removed because the send failed.
    pub evicted: usize,
}

#[derive(Default)]
struct Inner {
    by_user: HashMap<UserId, HashMap<ConnectionId, Arc<ConnectionHandle>>>,
    owner: HashMap<ConnectionId, UserId>,
}

impl Inner {
    fn detach(&mut self, id: &ConnectionId) -> Option<(UserId, Arc<ConnectionHandle>)> {
        let user_id = self.owner.remove(id)?;
        let set = self.by_user.get_mut(&user_id)?;
        let handle = set.remove(id);
        if set.is_empty() {
            let _ = self.by_user.remove(&user_id);
        }
        handle.map(|h| (user_id, h))
    }
}

/// Maps each user to the connections subscribed on their behalf.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handle` to `user_id`.
    ///
    /// A handle already registered under another user is moved; registering
    /// it again under the same user is a no-op.
    pub fn register(&self, user_id: UserId, handle: Arc<ConnectionHandle>) {
        let id = handle.id().clone();
        let mut inner = self.inner.lock();
        if let Some(previous) = inner.owner.get(&id).copied() {
            if previous == user_id {
                return;
            }
            let _ = inner.detach(&id);
            debug!(connection_id = %id, from = %previous, to = %user_id, "connection moved");
        }
        let _ = inner.owner.insert(id.clone(), user_id);
        let _ = inner.by_user.entry(user_id).or_default().insert(id.clone(), handle);
        debug!(connection_id = %id, %user_id, "connection registered");
    }

    /// Remove a connection from whichever user holds it.
    ///
    /// Returns the previous owner; unknown ids are ignored.
    pub fn unregister(&self, id: &ConnectionId) -> Option<UserId> {
        let (user_id, _) = self.inner.lock().detach(id)?;
        debug!(connection_id = %id, %user_id, "connection unregistered");
        Some(user_id)
    }

    /// Send `event` to every connection registered for `user_id`.
    ///
    /// The event is encoded once. Connections whose queue is full or closed
    /// are evicted and asked to close so their client reconnects. Nothing
    /// registered for the user is a silent no-op.
    pub fn broadcast(&self, user_id: UserId, event: &DomainEvent) -> BroadcastReport {
        let frame = match encode(&event.to_message()) {
            Ok(text) => Arc::new(text),
            Err(e) => {
                error!(%user_id, kind = event.kind.as_str(), error = %e, "failed to encode event");
                return BroadcastReport::default();
            }
        };
        self.broadcast_frame(user_id, &frame)
    }

    /// Queue an already-encoded frame on every connection of `user_id`.
    pub fn broadcast_frame(&self, user_id: UserId, frame: &Arc<String>) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut evicted: Vec<(Arc<ConnectionHandle>, SendError)> = Vec::new();
        {
            let mut inner = self.inner.lock();
            let Some(set) = inner.by_user.get(&user_id) else {
                return report;
            };
            counter!(BROADCASTS_TOTAL).increment(1);

            let mut failed = Vec::new();
            for (id, handle) in set {
                match handle.send(Arc::clone(frame)) {
                    Ok(()) => report.delivered += 1,
                    Err(e) => failed.push((id.clone(), e)),
                }
            }
            for (id, reason) in failed {
                if let Some((_, handle)) = inner.detach(&id) {
                    evicted.push((handle, reason));
                }
            }
        }

        report.evicted = evicted.len();
        counter!(DELIVERIES_TOTAL).increment(report.delivered as u64);
        for (handle, reason) in evicted {
            warn!(
                connection_id = %handle.id(),
                %user_id,
                reason = reason.as_str(),
                dropped = handle.drop_count(),
                "evicting connection after failed send"
            );
            counter!(EVICTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
            handle.close();
        }
        report
    }

    /// Total registered connections.
    pub fn connection_count(&self) -> usize {
        self.inner.lock().owner.len()
    }

    /// Users with at least one registered connection.
    pub fn user_count(&self) -> usize {
        self.inner.lock().by_user.len()
    }

    /// Ids of the connections registered for `user_id`.
    pub fn connections_for(&self, user_id: UserId) -> Vec<ConnectionId> {
        self.inner
            .lock()
            .by_user
            .get(&user_id)
            .map(|set| set.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// The user a connection is registered under.
    pub fn owner_of(&self, id: &ConnectionId) -> Option<UserId> {
        self.inner.lock().owner.get(id).copied()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use livefolio_core::{Message, decode_str};

    fn make_handle(capacity: usize) -> (Arc<ConnectionHandle>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(ConnectionHandle::new(tx)), rx)
    }

    fn update(user: i64, investment: i64) -> DomainEvent {
        DomainEvent::investment_update(UserId::new(user), json!({"investmentId": investment}))
    }

    // ── register / unregister ──

    #[test]
    fn empty_registry() {
        let reg = ConnectionRegistry::new();
        assert_eq!(reg.connection_count(), 0);
        assert_eq!(reg.user_count(), 0);
        assert!(reg.connections_for(UserId::new(1)).is_empty());
    }

    #[test]
    fn register_creates_user_set() {
        let reg = ConnectionRegistry::new();
        let (a, _ra) = make_handle(4);
        let (b, _rb) = make_handle(4);
        reg.register(UserId::new(42), a.clone());
        reg.register(UserId::new(42), b.clone());

        assert_eq!(reg.connection_count(), 2);
        assert_eq!(reg.user_count(), 1);
        let ids = reg.connections_for(UserId::new(42));
        assert!(ids.contains(a.id()));
        assert!(ids.contains(b.id()));
    }

    #[test]
    fn register_twice_same_user_is_noop() {
        let reg = ConnectionRegistry::new();
        let (a, _ra) = make_handle(4);
        reg.register(UserId::new(1), a.clone());
        reg.register(UserId::new(1), a);
        assert_eq!(reg.connection_count(), 1);
    }

    #[test]
    fn register_under_new_user_moves_handle() {
        let reg = ConnectionRegistry::new();
        let (a, _ra) = make_handle(4);
        reg.register(UserId::new(1), a.clone());
        reg.register(UserId::new(2), a.clone());

        assert_eq!(reg.connection_count(), 1);
        assert_eq!(reg.user_count(), 1);
        assert!(reg.connections_for(UserId::new(1)).is_empty());
        assert_eq!(reg.owner_of(a.id()), Some(UserId::new(2)));
    }

    #[test]
    fn unregister_removes_and_drops_empty_set() {
        let reg = ConnectionRegistry::new();
        let (a, _ra) = make_handle(4);
        reg.register(UserId::new(7), a.clone());
        assert_eq!(reg.unregister(a.id()), Some(UserId::new(7)));
        assert_eq!(reg.connection_count(), 0);
        assert_eq!(reg.user_count(), 0);
    }

    #[test]
    fn unregister_unknown_is_noop() {
        let reg = ConnectionRegistry::new();
        let (a, _ra) = make_handle(4);
        reg.register(UserId::new(7), a);
        assert_eq!(reg.unregister(&ConnectionId::from_raw("conn_missing")), None);
        assert_eq!(reg.connection_count(), 1);
    }

    // ── broadcast ──

    #[tokio::test]
    async fn broadcast_reaches_only_target_user() {
        let reg = ConnectionRegistry::new();
        let (a, mut ra) = make_handle(4);
        let (b, mut rb) = make_handle(4);
        let (other, mut ro) = make_handle(4);
        reg.register(UserId::new(42), a);
        reg.register(UserId::new(42), b);
        reg.register(UserId::new(9), other);

        let report = reg.broadcast(UserId::new(42), &update(42, 7));
        assert_eq!(report, BroadcastReport { delivered: 2, evicted: 0 });

        for rx in [&mut ra, &mut rb] {
            let frame = rx.recv().await.unwrap();
            match decode_str(&frame).unwrap() {
                Message::InvestmentUpdate { user_id, payload } => {
                    assert_eq!(user_id, UserId::new(42));
                    assert_eq!(payload["investmentId"], 7);
                }
                other => panic!("unexpected message: {other:?}"),
            }
        }
        assert!(ro.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_shares_one_encoding() {
        let reg = ConnectionRegistry::new();
        let (a, mut ra) = make_handle(4);
        let (b, mut rb) = make_handle(4);
        reg.register(UserId::new(1), a);
        reg.register(UserId::new(1), b);
        let _ = reg.broadcast(UserId::new(1), &update(1, 1));

        let fa = ra.recv().await.unwrap();
        let fb = rb.recv().await.unwrap();
        assert!(Arc::ptr_eq(&fa, &fb));
    }

    #[test]
    fn broadcast_without_connections_is_noop() {
        let reg = ConnectionRegistry::new();
        assert_eq!(reg.broadcast(UserId::new(5), &update(5, 1)), BroadcastReport::default());
    }

    #[test]
    fn closed_connection_is_evicted_and_closed() {
        let reg = ConnectionRegistry::new();
        let (dead, rx) = make_handle(4);
        let (live, _rl) = make_handle(4);
        drop(rx);
        reg.register(UserId::new(3), dead.clone());
        reg.register(UserId::new(3), live.clone());

        let report = reg.broadcast(UserId::new(3), &update(3, 1));
        assert_eq!(report, BroadcastReport { delivered: 1, evicted: 1 });
        assert!(dead.is_closed());
        assert!(!live.is_closed());
        assert_eq!(reg.connections_for(UserId::new(3)), vec![live.id().clone()]);
    }

    #[test]
    fn full_queue_is_evicted() {
        let reg = ConnectionRegistry::new();
        let (slow, _rx) = make_handle(1);
        reg.register(UserId::new(3), slow.clone());

        assert_eq!(reg.broadcast(UserId::new(3), &update(3, 1)).delivered, 1);
        let report = reg.broadcast(UserId::new(3), &update(3, 2));
        assert_eq!(report.evicted, 1);
        assert_eq!(slow.drop_count(), 1);
        assert!(slow.is_closed());
        assert_eq!(reg.user_count(), 0);
    }

    #[test]
    fn evicted_connection_unregister_is_safe() {
        let reg = ConnectionRegistry::new();
        let (dead, rx) = make_handle(1);
        drop(rx);
        reg.register(UserId::new(3), dead.clone());
        let _ = reg.broadcast(UserId::new(3), &update(3, 1));
        assert_eq!(reg.unregister(dead.id()), None);
    }

    // ── concurrency ──

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_register_move_broadcast_unregister() {
        const WORKERS: usize = 8;
        const HANDLES: usize = 16;
        const ROUNDS: usize = 200;
        const USERS: i64 = 4;

        let reg = Arc::new(ConnectionRegistry::new());
        let mut workers = Vec::new();
        for w in 0..WORKERS {
            let reg = Arc::clone(&reg);
            workers.push(tokio::spawn(async move {
                // Large enough that no queue fills: at most WORKERS * ROUNDS frames each.
                let handles: Vec<_> = (0..HANDLES).map(|_| make_handle(4096)).collect();
                for round in 0..ROUNDS {
                    for (i, (handle, _rx)) in handles.iter().enumerate() {
                        let user = UserId::new(((w + i + round) as i64) % USERS);
                        reg.register(user, Arc::clone(handle));
                    }
                    let target = (round as i64) % USERS;
                    let _ = reg.broadcast(UserId::new(target), &update(target, round as i64));
                    let (victim, _) = &handles[round % HANDLES];
                    let _ = reg.unregister(victim.id());
                    tokio::task::yield_now().await;
                }
                // Settle: even handles end under user `w % USERS`, odd ones removed.
                for (i, (handle, _rx)) in handles.iter().enumerate() {
                    if i % 2 == 0 {
                        reg.register(UserId::new((w as i64) % USERS), Arc::clone(handle));
                    } else {
                        let _ = reg.unregister(handle.id());
                    }
                }
                handles
            }));
        }

        let mut all = Vec::new();
        for worker in workers {
            all.extend(worker.await.unwrap());
        }

        assert!(all.iter().all(|(h, _)| !h.is_closed()), "no connection should be evicted");
        assert_eq!(reg.connection_count(), WORKERS * HANDLES / 2);

        let mut seen = std::collections::HashSet::new();
        for user in 0..USERS {
            for id in reg.connections_for(UserId::new(user)) {
                assert!(seen.insert(id.clone()), "{id} registered under two users");
                assert_eq!(reg.owner_of(&id), Some(UserId::new(user)));
            }
        }
        assert_eq!(seen.len(), reg.connection_count());

        for (w, chunk) in all.chunks(HANDLES).enumerate() {
            for (i, (handle, _rx)) in chunk.iter().enumerate() {
                let expected = (i % 2 == 0).then(|| UserId::new((w as i64) % USERS));
                assert_eq!(reg.owner_of(handle.id()), expected);
            }
        }
    }
}

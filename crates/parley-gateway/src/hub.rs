use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_types::events::PushEvent;
use parley_types::models::UserId;

pub type ConnectionId = Uuid;

/// Sending half of a connection's outbound queue.
pub type ConnectionHandle = mpsc::Sender<PushEvent>;

/// Default per-connection outbound queue depth.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;

/// Registry of live push connections.
///
/// Each connection owns a bounded queue drained by its own writer task, so
/// a connection sees events in the order `broadcast` enqueued them. A failed
/// enqueue (receiver gone or queue full) evicts the connection.
#[derive(Clone)]
pub struct ConnectionHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    registry: RwLock<Registry>,
    outbound_buffer: usize,
}

#[derive(Default)]
struct Registry {
    /// connection_id -> (user_id, sender)
    connections: HashMap<ConnectionId, (UserId, ConnectionHandle)>,
    /// user_id -> connection ids, for targeted fan-out
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
}

impl Registry {
    fn remove(&mut self, conn_id: ConnectionId) -> Option<UserId> {
        let (user_id, _) = self.connections.remove(&conn_id)?;
        if let Some(ids) = self.by_user.get_mut(&user_id) {
            ids.remove(&conn_id);
            if ids.is_empty() {
                self.by_user.remove(&user_id);
            }
        }
        Some(user_id)
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOUND_BUFFER)
    }
}

impl ConnectionHub {
    pub fn new(outbound_buffer: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                registry: RwLock::new(Registry::default()),
                outbound_buffer: outbound_buffer.max(1),
            }),
        }
    }

    /// Register a connection under a user. Registering an id that is
    /// already present replaces its handle and owner.
    pub async fn register(&self, conn_id: ConnectionId, user_id: UserId, handle: ConnectionHandle) {
        let mut registry = self.inner.registry.write().await;
        registry.remove(conn_id);
        registry.connections.insert(conn_id, (user_id, handle));
        registry.by_user.entry(user_id).or_default().insert(conn_id);
        debug!("Registered connection {} for user {}", conn_id, user_id);
    }

    /// Create a fresh connection id and queue and register them.
    pub async fn connect(&self, user_id: UserId) -> (ConnectionId, mpsc::Receiver<PushEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.inner.outbound_buffer);
        self.register(conn_id, user_id, tx).await;
        (conn_id, rx)
    }

    /// Remove a connection. Returns false if it was not registered.
    pub async fn deregister(&self, conn_id: ConnectionId) -> bool {
        let removed = self.inner.registry.write().await.remove(conn_id);
        if let Some(user_id) = removed {
            debug!("Deregistered connection {} of user {}", conn_id, user_id);
        }
        removed.is_some()
    }

    /// Deliver an event to every connection (`targets == None`) or to all
    /// connections of the given users. Returns how many connections accepted
    /// it. Connections that cannot accept it are evicted, not retried.
    pub async fn broadcast(&self, event: &PushEvent, targets: Option<&[UserId]>) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        {
            let registry = self.inner.registry.read().await;
            let recipients: HashSet<ConnectionId> = match targets {
                None => registry.connections.keys().copied().collect(),
                Some(users) => users
                    .iter()
                    .filter_map(|uid| registry.by_user.get(uid))
                    .flatten()
                    .copied()
                    .collect(),
            };

            for conn_id in recipients {
                let Some((_, tx)) = registry.connections.get(&conn_id) else {
                    continue;
                };
                match tx.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Closed(_)) => dead.push(conn_id),
                    Err(TrySendError::Full(_)) => {
                        warn!("Connection {} outbound queue full, evicting", conn_id);
                        dead.push(conn_id);
                    }
                }
            }
        }

        if !dead.is_empty() {
            let mut registry = self.inner.registry.write().await;
            for conn_id in &dead {
                registry.remove(*conn_id);
            }
            info!("Evicted {} dead connection(s) during {}", dead.len(), event.kind());
        }

        match event.chat_id() {
            Some(chat_id) => debug!("{} (chat {}) delivered to {} connection(s)", event.kind(), chat_id, delivered),
            None => debug!("{} delivered to {} connection(s)", event.kind(), delivered),
        }
        delivered
    }

    /// Drop every connection whose receiving side is gone.
    pub async fn reap_closed(&self) -> usize {
        let mut registry = self.inner.registry.write().await;
        let closed: Vec<ConnectionId> = registry
            .connections
            .iter()
            .filter(|(_, (_, tx))| tx.is_closed())
            .map(|(id, _)| *id)
            .collect();
        for conn_id in &closed {
            registry.remove(*conn_id);
        }
        closed.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.registry.read().await.connections.len()
    }

    pub async fn user_connection_count(&self, user_id: UserId) -> usize {
        self.inner
            .registry
            .read()
            .await
            .by_user
            .get(&user_id)
            .map_or(0, HashSet::len)
    }
}

/// Background task that periodically removes closed connections.
pub async fn run_reaper(hub: ConnectionHub, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let reaped = hub.reap_closed().await;
        if reaped > 0 {
            info!("Reaper: removed {} closed connection(s)", reaped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::models::User;

    fn new_user_event(id: UserId) -> PushEvent {
        PushEvent::NewUser {
            user: User {
                id,
                username: format!("user{id}"),
                email: format!("user{id}@example.com"),
            },
        }
    }

    #[tokio::test]
    async fn untargeted_broadcast_reaches_everyone() {
        let hub = ConnectionHub::default();
        let (_, mut rx1) = hub.connect(1).await;
        let (_, mut rx2) = hub.connect(2).await;

        let event = new_user_event(3);
        assert_eq!(hub.broadcast(&event, None).await, 2);
        assert_eq!(rx1.recv().await.unwrap(), event);
        assert_eq!(rx2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn targeted_broadcast_skips_other_users() {
        let hub = ConnectionHub::default();
        let (_, mut alice) = hub.connect(1).await;
        let (_, mut alice_tab) = hub.connect(1).await;
        let (_, mut bob) = hub.connect(2).await;

        let event = new_user_event(9);
        // Repeated target ids still deliver once per connection
        assert_eq!(hub.broadcast(&event, Some(&[1, 1, 42][..])).await, 2);
        assert_eq!(alice.recv().await.unwrap(), event);
        assert_eq!(alice_tab.recv().await.unwrap(), event);
        assert!(alice.try_recv().is_err());
        assert!(bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_connections_are_evicted_not_retried() {
        let hub = ConnectionHub::default();
        let mut open = Vec::new();
        for uid in 0..3 {
            open.push(hub.connect(uid).await.1);
        }
        let (_, gone_a) = hub.connect(10).await;
        let (_, gone_b) = hub.connect(11).await;
        assert_eq!(hub.connection_count().await, 5);

        drop(gone_a);
        drop(gone_b);

        let event = new_user_event(99);
        assert_eq!(hub.broadcast(&event, None).await, 3);
        assert_eq!(hub.connection_count().await, 3);
        assert_eq!(hub.user_connection_count(10).await, 0);
        for rx in &mut open {
            assert_eq!(rx.recv().await.unwrap(), event);
        }

        // A second broadcast doesn't try the evicted ones again
        assert_eq!(hub.broadcast(&event, None).await, 3);
    }

    #[tokio::test]
    async fn full_queue_evicts_connection() {
        let hub = ConnectionHub::new(1);
        let (_, _stalled) = hub.connect(1).await;

        assert_eq!(hub.broadcast(&new_user_event(2), None).await, 1);
        assert_eq!(hub.broadcast(&new_user_event(3), None).await, 0);
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let hub = ConnectionHub::default();
        let conn_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(4);

        hub.register(conn_id, 1, tx.clone()).await;
        hub.register(conn_id, 1, tx).await;
        assert_eq!(hub.connection_count().await, 1);
        assert_eq!(hub.user_connection_count(1).await, 1);

        hub.broadcast(&new_user_event(5), Some(&[1][..])).await;
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reregister_moves_connection_to_new_user() {
        let hub = ConnectionHub::default();
        let conn_id = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(4);

        hub.register(conn_id, 1, tx.clone()).await;
        hub.register(conn_id, 2, tx).await;
        assert_eq!(hub.user_connection_count(1).await, 0);
        assert_eq!(hub.user_connection_count(2).await, 1);
    }

    #[tokio::test]
    async fn deregister_removes_and_reports() {
        let hub = ConnectionHub::default();
        let (conn_id, _rx) = hub.connect(1).await;

        assert!(hub.deregister(conn_id).await);
        assert!(!hub.deregister(conn_id).await);
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn reaper_drops_closed_receivers() {
        let hub = ConnectionHub::default();
        let (_, _kept) = hub.connect(1).await;
        let (_, dropped) = hub.connect(2).await;
        drop(dropped);

        assert_eq!(hub.reap_closed().await, 1);
        assert_eq!(hub.connection_count().await, 1);
    }

    #[tokio::test]
    async fn events_arrive_in_broadcast_order() {
        let hub = ConnectionHub::default();
        let (_, mut rx) = hub.connect(1).await;

        for id in 0..10 {
            hub.broadcast(&new_user_event(id), None).await;
        }
        for id in 0..10 {
            assert_eq!(rx.recv().await.unwrap(), new_user_event(id));
        }
    }
}

// Connection registry: user identity -> the connection that routes for it,
// plus every registered connection still open.

use std::collections::HashMap;
use std::fmt;

use parley_common::protocol::ws::GatewayEvent;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Server-assigned identifier for one duplex connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("connection {0} is closed")]
pub struct ConnectionClosed(pub ConnectionId);

/// Cloneable handle to a connection's outbound queue.
///
/// Equality is by connection id; two handles to the same queue compare equal.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<GatewayEvent>,
}

impl ConnectionHandle {
    pub fn new(outbound: mpsc::UnboundedSender<GatewayEvent>) -> Self {
        Self { id: ConnectionId::new(), outbound }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues an event for the connection's writer task. Fails only once the
    /// connection has gone away.
    pub fn send(&self, event: GatewayEvent) -> Result<(), ConnectionClosed> {
        self.outbound.send(event).map_err(|_| ConnectionClosed(self.id))
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

/// Online users and every connection that should hear about them, read
/// under a single lock.
#[derive(Debug, Clone, Default)]
pub struct PresenceView {
    /// Sorted ascending.
    pub online_users: Vec<String>,
    /// Every registered connection that has not disconnected yet, including
    /// ones a newer connection has replaced as their user's route.
    pub connections: Vec<(String, ConnectionHandle)>,
}

/// Result of [`ConnectionRegistry::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterOutcome {
    /// The connection that previously routed for this identity, if any.
    pub replaced: Option<ConnectionHandle>,
    /// Online identities right after the mutation.
    pub online_count: usize,
}

/// Result of [`ConnectionRegistry::unregister`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnregisterOutcome {
    /// The identity that went offline, if this connection was its route.
    pub user_id: Option<String>,
    /// Online identities right after the mutation.
    pub online_count: usize,
}

#[derive(Debug, Default)]
struct RegistryState {
    by_user: HashMap<String, ConnectionHandle>,
    live: HashMap<ConnectionId, (String, ConnectionHandle)>,
}

/// Process-wide map of online users.
///
/// At most one connection routes for each identity; registering again for the
/// same identity replaces the earlier route. A replaced connection stays in
/// the live set until it disconnects, so it keeps receiving presence. Removal
/// is keyed by connection, so a late disconnect from a replaced connection
/// never evicts its successor. The registry does not validate identities;
/// callers filter them first.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    /// Records `handle` as the live connection for `user_id`.
    pub async fn register(&self, user_id: &str, handle: ConnectionHandle) -> RegisterOutcome {
        let mut guard = self.state.write().await;
        let connection_id = handle.id();
        guard.live.insert(connection_id, (user_id.to_owned(), handle.clone()));
        let replaced = guard
            .by_user
            .insert(user_id.to_owned(), handle)
            .filter(|previous| previous.id() != connection_id);

        RegisterOutcome { replaced, online_count: guard.by_user.len() }
    }

    pub async fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.state.read().await.by_user.get(user_id).cloned()
    }

    /// Drops `connection_id` from the live set and removes its user's route if
    /// the route still points at it.
    pub async fn unregister(&self, connection_id: ConnectionId) -> UnregisterOutcome {
        let mut guard = self.state.write().await;
        let user_id = match guard.live.remove(&connection_id) {
            Some((user_id, _)) => match guard.by_user.get(&user_id) {
                Some(current) if current.id() == connection_id => {
                    guard.by_user.remove(&user_id);
                    Some(user_id)
                }
                _ => None,
            },
            None => None,
        };

        UnregisterOutcome { user_id, online_count: guard.by_user.len() }
    }

    /// Current online identities, sorted.
    pub async fn snapshot(&self) -> Vec<String> {
        let guard = self.state.read().await;
        sorted_users(&guard)
    }

    pub async fn presence_view(&self) -> PresenceView {
        let guard = self.state.read().await;
        PresenceView {
            online_users: sorted_users(&guard),
            connections: guard.live.values().cloned().collect(),
        }
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.by_user.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Registered connections not yet disconnected.
    pub async fn live_connections(&self) -> usize {
        self.state.read().await.live.len()
    }
}

fn sorted_users(state: &RegistryState) -> Vec<String> {
    let mut users: Vec<String> = state.by_user.keys().cloned().collect();
    users.sort();
    users
}

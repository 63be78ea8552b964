pub mod actor;
pub mod handler;
pub mod protocol;
pub mod rooms;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Identifier for one live transport session. Unique within this process
/// only; the presence tracker widens it with the process id before handing
/// it to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    /// Allocate the next per-process connection id.
    pub fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

struct ConnectionEntry {
    user_id: i64,
    sender: ConnectionSender,
}

/// Connection registry: bookkeeping for connections local to this process.
/// A user can have multiple concurrent connections (multiple devices/tabs).
/// Purely in-memory, cleared on process restart — fleet-wide knowledge
/// lives in the broker, not here.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    by_user: DashMap<i64, Vec<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            by_user: DashMap::new(),
        }
    }

    /// Bind an authenticated connection to a user identity.
    pub fn register(&self, conn_id: ConnectionId, user_id: i64, sender: ConnectionSender) {
        self.connections
            .insert(conn_id, ConnectionEntry { user_id, sender });
        self.by_user.entry(user_id).or_default().push(conn_id);

        let conn_count = self.by_user.get(&user_id).map(|v| v.len()).unwrap_or(0);
        tracing::debug!(
            user_id,
            connection_id = %conn_id,
            connections = conn_count,
            "Connection registered"
        );
    }

    /// Remove the binding. Idempotent — unregistering twice is a no-op.
    pub fn unregister(&self, conn_id: ConnectionId) {
        let Some((_, entry)) = self.connections.remove(&conn_id) else {
            return;
        };

        let mut remove_user = false;
        if let Some(mut conns) = self.by_user.get_mut(&entry.user_id) {
            conns.retain(|id| *id != conn_id);
            if conns.is_empty() {
                remove_user = true;
            }
        }
        if remove_user {
            self.by_user.remove(&entry.user_id);
        }

        tracing::debug!(
            user_id = entry.user_id,
            connection_id = %conn_id,
            "Connection unregistered"
        );
    }

    /// All local connection ids bound to a user (empty if none).
    pub fn connections_for_user(&self, user_id: i64) -> Vec<ConnectionId> {
        self.by_user
            .get(&user_id)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Sender handle for a specific connection, if it is still registered.
    pub fn sender(&self, conn_id: ConnectionId) -> Option<ConnectionSender> {
        self.connections.get(&conn_id).map(|e| e.sender.clone())
    }

    /// Snapshot of every registered connection's sender, for events that
    /// go to all local clients (presence transitions).
    pub fn all_senders(&self) -> Vec<ConnectionSender> {
        self.connections
            .iter()
            .map(|e| e.sender.clone())
            .collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> ConnectionSender {
        mpsc::unbounded_channel().0
    }

    #[test]
    fn register_and_lookup() {
        let registry = ConnectionRegistry::new();
        let c1 = ConnectionId::next();
        let c2 = ConnectionId::next();
        registry.register(c1, 7, sender());
        registry.register(c2, 7, sender());

        let conns = registry.connections_for_user(7);
        assert_eq!(conns.len(), 2);
        assert!(conns.contains(&c1) && conns.contains(&c2));
        assert!(registry.sender(c1).is_some());
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let c1 = ConnectionId::next();
        registry.register(c1, 7, sender());

        registry.unregister(c1);
        registry.unregister(c1); // no-op, not an error

        assert!(registry.connections_for_user(7).is_empty());
        assert!(registry.sender(c1).is_none());
    }

    #[test]
    fn unregister_keeps_other_connections() {
        let registry = ConnectionRegistry::new();
        let c1 = ConnectionId::next();
        let c2 = ConnectionId::next();
        registry.register(c1, 7, sender());
        registry.register(c2, 7, sender());

        registry.unregister(c1);
        assert_eq!(registry.connections_for_user(7), vec![c2]);
    }
}

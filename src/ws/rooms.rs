//! Channel subscription bookkeeping.
//!
//! A channel is a named broadcast group: `user_<id>` (personal, joined
//! automatically on authentication) or `chat_<roomId>` (joined/left on
//! client request). Membership here is process-local only — reaching
//! subscribers on sibling processes is the broker relay's job.

use std::collections::HashSet;

use dashmap::DashMap;

use super::ConnectionId;

/// Channel name for a user's personal notification channel.
pub fn personal_channel(user_id: i64) -> String {
    format!("user_{user_id}")
}

/// Channel name for a chat room.
pub fn room_channel(chat_room_id: i64) -> String {
    format!("chat_{chat_room_id}")
}

/// Many-to-many relation between local connections and channels.
pub struct RoomMembership {
    channels: DashMap<String, HashSet<ConnectionId>>,
    by_conn: DashMap<ConnectionId, HashSet<String>>,
}

impl RoomMembership {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            by_conn: DashMap::new(),
        }
    }

    /// Add a connection to a channel. Idempotent.
    pub fn join(&self, conn_id: ConnectionId, channel: &str) {
        self.channels
            .entry(channel.to_string())
            .or_default()
            .insert(conn_id);
        self.by_conn
            .entry(conn_id)
            .or_default()
            .insert(channel.to_string());
    }

    /// Remove a connection from a channel. Idempotent.
    pub fn leave(&self, conn_id: ConnectionId, channel: &str) {
        let mut drop_channel = false;
        if let Some(mut members) = self.channels.get_mut(channel) {
            members.remove(&conn_id);
            if members.is_empty() {
                drop_channel = true;
            }
        }
        if drop_channel {
            self.channels.remove(channel);
        }

        if let Some(mut chans) = self.by_conn.get_mut(&conn_id) {
            chans.remove(channel);
        }
    }

    /// Process-local members of a channel (empty if nobody joined here).
    pub fn members_of(&self, channel: &str) -> Vec<ConnectionId> {
        self.channels
            .get(channel)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Channels a connection currently belongs to.
    pub fn channels_of(&self, conn_id: ConnectionId) -> Vec<String> {
        self.by_conn
            .get(&conn_id)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove a connection from every channel. Called once on disconnect.
    pub fn drop_connection(&self, conn_id: ConnectionId) {
        let Some((_, channels)) = self.by_conn.remove(&conn_id) else {
            return;
        };
        for channel in channels {
            let mut drop_channel = false;
            if let Some(mut members) = self.channels.get_mut(&channel) {
                members.remove(&conn_id);
                if members.is_empty() {
                    drop_channel = true;
                }
            }
            if drop_channel {
                self.channels.remove(&channel);
            }
        }
    }
}

impl Default for RoomMembership {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_is_idempotent() {
        let rooms = RoomMembership::new();
        let c = ConnectionId(1);
        rooms.join(c, "chat_5");
        rooms.join(c, "chat_5");

        assert_eq!(rooms.members_of("chat_5"), vec![c]);
        assert_eq!(rooms.channels_of(c), vec!["chat_5".to_string()]);
    }

    #[test]
    fn leave_is_idempotent() {
        let rooms = RoomMembership::new();
        let c = ConnectionId(1);
        rooms.join(c, "chat_5");
        rooms.leave(c, "chat_5");
        rooms.leave(c, "chat_5");

        assert!(rooms.members_of("chat_5").is_empty());
    }

    #[test]
    fn drop_connection_clears_all_memberships() {
        let rooms = RoomMembership::new();
        let c1 = ConnectionId(1);
        let c2 = ConnectionId(2);
        rooms.join(c1, "user_7");
        rooms.join(c1, "chat_5");
        rooms.join(c2, "chat_5");

        rooms.drop_connection(c1);

        assert!(rooms.channels_of(c1).is_empty());
        assert!(rooms.members_of("user_7").is_empty());
        assert_eq!(rooms.members_of("chat_5"), vec![c2]);
    }

    #[test]
    fn channel_isolation() {
        let rooms = RoomMembership::new();
        let c1 = ConnectionId(1);
        let c2 = ConnectionId(2);
        rooms.join(c1, "chat_5");
        rooms.join(c2, "chat_6");

        assert_eq!(rooms.members_of("chat_5"), vec![c1]);
        assert_eq!(rooms.members_of("chat_6"), vec![c2]);
    }
}

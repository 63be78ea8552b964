//! Fleet-wide presence tracking over the shared broker.
//!
//! A user is online iff their broker-held connection set is non-empty,
//! across every server process. The set member is `<process_id>:<conn_id>`
//! so entries are globally unique even though connection ids are only
//! per-process. Keys carry a bounded TTL as a safety net against entries
//! orphaned by a crashed process; normal disconnect cleanup always runs
//! first.
//!
//! Transition detection relies on the broker's atomic mutate-and-count:
//! `mark_connected` reports online on a 0→1 cardinality, `mark_disconnected`
//! reports offline on 1→0. Two devices disconnecting at the same instant
//! produce exactly one offline transition.

use std::sync::Arc;
use std::time::Duration;

use crate::broker::{Broker, BrokerError};
use crate::ws::ConnectionId;

/// Broker key holding the ids of currently-online users.
const ONLINE_USERS_KEY: &str = "online_users";

fn user_sockets_key(user_id: i64) -> String {
    format!("user:sockets:{user_id}")
}

pub struct PresenceTracker {
    broker: Arc<dyn Broker>,
    process_id: String,
    /// TTL applied to per-user connection sets (refreshed on every add).
    record_ttl: Duration,
}

impl PresenceTracker {
    pub fn new(broker: Arc<dyn Broker>, process_id: String, record_ttl: Duration) -> Self {
        Self {
            broker,
            process_id,
            record_ttl,
        }
    }

    fn member(&self, conn_id: ConnectionId) -> String {
        format!("{}:{}", self.process_id, conn_id)
    }

    /// Record a new authenticated connection. Returns true if the user
    /// just transitioned offline→online (first connection anywhere in the
    /// fleet), in which case the caller broadcasts `user_online`.
    pub async fn mark_connected(
        &self,
        user_id: i64,
        conn_id: ConnectionId,
    ) -> Result<bool, BrokerError> {
        let cardinality = self
            .broker
            .set_add(
                &user_sockets_key(user_id),
                &self.member(conn_id),
                Some(self.record_ttl),
            )
            .await?;

        let went_online = cardinality == 1;
        if went_online {
            self.broker
                .set_add(ONLINE_USERS_KEY, &user_id.to_string(), None)
                .await?;
            tracing::info!(user_id, connection_id = %conn_id, "User is now online");
        } else {
            tracing::debug!(
                user_id,
                connection_id = %conn_id,
                connections = cardinality,
                "Additional connection for online user"
            );
        }
        Ok(went_online)
    }

    /// Record a disconnect. Returns true if the user just transitioned
    /// online→offline (last connection gone), in which case the caller
    /// broadcasts `user_offline`. The removal and the emptiness check are
    /// one atomic broker operation.
    pub async fn mark_disconnected(
        &self,
        user_id: i64,
        conn_id: ConnectionId,
    ) -> Result<bool, BrokerError> {
        let remaining = self
            .broker
            .set_remove(&user_sockets_key(user_id), &self.member(conn_id))
            .await?;

        let went_offline = remaining == 0;
        if went_offline {
            // The emptied connection set is dropped by set_remove itself;
            // deleting it here separately could wipe a member added by a
            // device reconnecting in between.
            self.broker
                .set_remove(ONLINE_USERS_KEY, &user_id.to_string())
                .await?;
            tracing::info!(user_id, connection_id = %conn_id, "User is now offline");
        } else {
            tracing::debug!(
                user_id,
                connection_id = %conn_id,
                remaining,
                "Disconnected one device, user still online"
            );
        }
        Ok(went_offline)
    }

    /// Current fleet-wide set of online user ids, used to seed a newly
    /// connected client.
    pub async fn snapshot_online_users(&self) -> Result<Vec<i64>, BrokerError> {
        let members = self.broker.set_members(ONLINE_USERS_KEY).await?;
        let mut ids: Vec<i64> = members
            .iter()
            .filter_map(|m| m.parse::<i64>().ok())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;

    fn tracker() -> PresenceTracker {
        PresenceTracker::new(
            Arc::new(MemoryBroker::new()),
            "proc-a".to_string(),
            Duration::from_secs(86400),
        )
    }

    #[tokio::test]
    async fn single_device_lifecycle() {
        let presence = tracker();
        let conn = ConnectionId(1);

        assert!(presence.mark_connected(7, conn).await.unwrap());
        assert_eq!(presence.snapshot_online_users().await.unwrap(), vec![7]);
        assert!(presence.mark_disconnected(7, conn).await.unwrap());
        assert!(presence.snapshot_online_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn multi_device_emits_single_transition_each_way() {
        let presence = tracker();
        let d1 = ConnectionId(1);
        let d2 = ConnectionId(2);

        assert!(presence.mark_connected(7, d1).await.unwrap());
        // Second device: already online, no transition
        assert!(!presence.mark_connected(7, d2).await.unwrap());

        // First device leaves: still online via d2
        assert!(!presence.mark_disconnected(7, d1).await.unwrap());
        assert_eq!(presence.snapshot_online_users().await.unwrap(), vec![7]);

        // Last device leaves: offline transition
        assert!(presence.mark_disconnected(7, d2).await.unwrap());
        assert!(presence.snapshot_online_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_disconnects_emit_exactly_one_offline() {
        let broker = Arc::new(MemoryBroker::new());
        let presence = Arc::new(PresenceTracker::new(
            broker,
            "proc-a".to_string(),
            Duration::from_secs(86400),
        ));

        for _ in 0..50 {
            let d1 = ConnectionId::next();
            let d2 = ConnectionId::next();
            presence.mark_connected(7, d1).await.unwrap();
            presence.mark_connected(7, d2).await.unwrap();

            let p1 = presence.clone();
            let p2 = presence.clone();
            let (r1, r2) = tokio::join!(
                tokio::spawn(async move { p1.mark_disconnected(7, d1).await.unwrap() }),
                tokio::spawn(async move { p2.mark_disconnected(7, d2).await.unwrap() }),
            );
            let offline_emits = [r1.unwrap(), r2.unwrap()]
                .iter()
                .filter(|&&went| went)
                .count();
            assert_eq!(offline_emits, 1, "exactly one offline transition");
        }
    }

    #[tokio::test]
    async fn reconnect_racing_disconnect_keeps_fresh_member() {
        let broker = Arc::new(MemoryBroker::new());
        let presence = Arc::new(PresenceTracker::new(
            broker.clone(),
            "proc-a".to_string(),
            Duration::from_secs(86400),
        ));

        for _ in 0..50 {
            let d1 = ConnectionId::next();
            let d2 = ConnectionId::next();
            presence.mark_connected(7, d1).await.unwrap();

            // Old device disconnects while a new one connects
            let p1 = presence.clone();
            let p2 = presence.clone();
            let (r1, r2) = tokio::join!(
                tokio::spawn(async move { p1.mark_disconnected(7, d1).await.unwrap() }),
                tokio::spawn(async move { p2.mark_connected(7, d2).await.unwrap() }),
            );
            r1.unwrap();
            r2.unwrap();

            // Whatever the interleaving, the fresh connection survives and
            // the user reads as online
            let members = broker.set_members("user:sockets:7").await.unwrap();
            assert_eq!(members, vec![format!("proc-a:{d2}")]);
            assert_eq!(presence.snapshot_online_users().await.unwrap(), vec![7]);

            presence.mark_disconnected(7, d2).await.unwrap();
        }
    }

    #[tokio::test]
    async fn distinct_users_do_not_interfere() {
        let presence = tracker();
        presence.mark_connected(1, ConnectionId(10)).await.unwrap();
        presence.mark_connected(2, ConnectionId(11)).await.unwrap();

        assert_eq!(presence.snapshot_online_users().await.unwrap(), vec![1, 2]);

        presence
            .mark_disconnected(1, ConnectionId(10))
            .await
            .unwrap();
        assert_eq!(presence.snapshot_online_users().await.unwrap(), vec![2]);
    }
}

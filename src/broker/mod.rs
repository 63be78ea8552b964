//! Shared broker abstraction.
//!
//! Horizontal scaling is achieved by running many server processes behind
//! a shared broker that provides two capabilities:
//!
//! 1. cross-process publish/subscribe keyed by channel name (event relay),
//! 2. an atomic keyed-set primitive (add/remove/members with TTL) used for
//!    fleet-wide presence.
//!
//! `set_add` and `set_remove` return the cardinality *after* the mutation,
//! computed atomically with it. Presence transitions (0→1 online, 1→0
//! offline) are derived from that return value, so two concurrent
//! disconnects can never both observe an empty set.
//!
//! The in-process [`memory::MemoryBroker`] is the single-node and test
//! backend. A Redis-backed implementation would map these operations onto
//! SADD/SREM/SCARD (scripted for atomicity), EXPIRE, and PUBLISH/SUBSCRIBE
//! behind the same trait.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

/// Errors surfaced by broker operations. All callers treat these as
/// transient: log, drop the operation, keep the connection alive.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Add a member to a keyed set, refreshing the key's TTL if given.
    /// Returns the set's cardinality after the add.
    async fn set_add(
        &self,
        key: &str,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<u64, BrokerError>;

    /// Remove a member from a keyed set. Returns the cardinality after the
    /// removal, computed atomically with it. Removing from a missing key
    /// or a missing member returns the current (possibly zero) cardinality.
    /// A set that becomes empty is dropped as part of the same atomic
    /// operation — a separate cleanup step could race a concurrent
    /// `set_add` and wipe the fresh member.
    async fn set_remove(&self, key: &str, member: &str) -> Result<u64, BrokerError>;

    /// All members of a keyed set (empty if the key does not exist).
    async fn set_members(&self, key: &str) -> Result<Vec<String>, BrokerError>;

    /// Publish a payload to every subscriber of a channel, on every process.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Subscribe to a channel. Receivers see payloads published by any
    /// process, including this one — relay consumers filter out their own
    /// frames by origin.
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<Vec<u8>>;
}

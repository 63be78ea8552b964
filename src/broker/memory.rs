//! In-process broker backend.
//!
//! All keyed sets live behind a single mutex, which makes every
//! mutate-and-count operation atomic by construction. Pub/sub is a
//! tokio broadcast channel per channel name. TTLs are enforced lazily:
//! an expired key is treated as absent the next time it is touched.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use super::{Broker, BrokerError};

/// Capacity of each pub/sub channel. Slow subscribers that fall behind
/// lose frames (RecvError::Lagged) — delivery is fire-and-forget.
const CHANNEL_CAPACITY: usize = 1024;

struct SetEntry {
    members: HashSet<String>,
    expires_at: Option<Instant>,
}

impl SetEntry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

pub struct MemoryBroker {
    sets: Mutex<HashMap<String, SetEntry>>,
    channels: DashMap<String, broadcast::Sender<Vec<u8>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            sets: Mutex::new(HashMap::new()),
            channels: DashMap::new(),
        }
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn set_add(
        &self,
        key: &str,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<u64, BrokerError> {
        let mut sets = self
            .sets
            .lock()
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        let entry = sets.entry(key.to_string()).or_insert_with(|| SetEntry {
            members: HashSet::new(),
            expires_at: None,
        });
        if entry.expired() {
            entry.members.clear();
        }
        entry.members.insert(member.to_string());
        entry.expires_at = ttl.map(|d| Instant::now() + d);
        Ok(entry.members.len() as u64)
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<u64, BrokerError> {
        let mut sets = self
            .sets
            .lock()
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        let Some(entry) = sets.get_mut(key) else {
            return Ok(0);
        };
        if entry.expired() {
            sets.remove(key);
            return Ok(0);
        }
        entry.members.remove(member);
        let remaining = entry.members.len() as u64;
        if remaining == 0 {
            sets.remove(key);
        }
        Ok(remaining)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, BrokerError> {
        let sets = self
            .sets
            .lock()
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        Ok(sets
            .get(key)
            .filter(|entry| !entry.expired())
            .map(|entry| entry.members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        // send() errors when there are no subscribers — that's fine.
        let _ = self.sender_for(channel).send(payload);
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<Vec<u8>> {
        self.sender_for(channel).subscribe()
    }
}

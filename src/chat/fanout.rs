//! Event fan-out engine: the only component that knows both what happened
//! and who should hear about it.
//!
//! `publish` resolves a domain event into (target, wire event) pairs,
//! delivers to local subscribers through the connection registry and room
//! membership, then relays an envelope through the broker so sibling
//! processes deliver to theirs. Delivery is fire-and-forget: a dropped
//! frame is recovered by the client's normal REST refetch, not retried
//! here.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use crate::broker::Broker;
use crate::chat::events::DomainEvent;
use crate::ws::protocol::ServerEvent;
use crate::ws::rooms::{personal_channel, room_channel, RoomMembership};
use crate::ws::{ConnectionId, ConnectionRegistry};

/// Broker pub/sub channel carrying relay envelopes between processes.
const RELAY_CHANNEL: &str = "convo:events";

/// Where a relayed event should be delivered on the receiving process.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum RelayTarget {
    /// Members of one named channel.
    Channel(String),
    /// Every connected client (presence transitions).
    AllConnections,
}

/// Envelope relayed through the broker. `origin` lets each process skip
/// frames it published itself — local delivery already happened there.
#[derive(Debug, Serialize, Deserialize)]
struct RelayEnvelope {
    origin: String,
    target: RelayTarget,
    event: ServerEvent,
}

pub struct FanoutEngine {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomMembership>,
    broker: Arc<dyn Broker>,
    process_id: String,
}

impl FanoutEngine {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomMembership>,
        broker: Arc<dyn Broker>,
        process_id: String,
    ) -> Self {
        Self {
            registry,
            rooms,
            broker,
            process_id,
        }
    }

    /// Fan a domain event out to every subscribed connection, local and
    /// remote. `except` suppresses local delivery to the originating
    /// connection (typing and join/leave notices exclude their sender);
    /// it never applies remotely since that connection lives here.
    pub async fn publish(&self, event: DomainEvent, except: Option<ConnectionId>) {
        for (target, wire_event) in resolve_targets(event) {
            match &target {
                RelayTarget::Channel(channel) => {
                    self.deliver_to_channel(channel, &wire_event, except)
                }
                RelayTarget::AllConnections => self.deliver_to_all(&wire_event),
            }
            self.relay(target, wire_event).await;
        }
    }

    /// Deliver to local members of a channel.
    fn deliver_to_channel(
        &self,
        channel: &str,
        event: &ServerEvent,
        except: Option<ConnectionId>,
    ) {
        let Some(msg) = event.to_message() else {
            return;
        };
        for conn_id in self.rooms.members_of(channel) {
            if Some(conn_id) == except {
                continue;
            }
            if let Some(sender) = self.registry.sender(conn_id) {
                let _ = sender.send(msg.clone());
            }
        }
    }

    /// Deliver to every local connection.
    fn deliver_to_all(&self, event: &ServerEvent) {
        let Some(msg) = event.to_message() else {
            return;
        };
        for sender in self.registry.all_senders() {
            let _ = sender.send(msg.clone());
        }
    }

    /// Relay through the broker so sibling processes deliver to their
    /// local subscribers. Best-effort: failures are logged and dropped.
    async fn relay(&self, target: RelayTarget, event: ServerEvent) {
        let envelope = RelayEnvelope {
            origin: self.process_id.clone(),
            target,
            event,
        };
        let payload = match serde_json::to_vec(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode relay envelope");
                return;
            }
        };
        if let Err(e) = self.broker.publish(RELAY_CHANNEL, payload).await {
            tracing::warn!(error = %e, "Broker relay publish failed");
        }
    }

    /// Consume relay frames from sibling processes and deliver them to
    /// local subscribers. Runs for the life of the process; malformed
    /// frames are dropped, never fatal.
    pub async fn run_relay(self: Arc<Self>) {
        let mut rx = self.broker.subscribe(RELAY_CHANNEL);
        loop {
            let payload = match rx.recv().await {
                Ok(payload) => payload,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Relay subscriber lagged, frames dropped");
                    continue;
                }
                Err(RecvError::Closed) => {
                    tracing::info!("Broker relay channel closed, stopping relay task");
                    break;
                }
            };

            let envelope = match serde_json::from_slice::<RelayEnvelope>(&payload) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping malformed relay envelope");
                    continue;
                }
            };

            // Our own frames were already delivered locally at publish time.
            if envelope.origin == self.process_id {
                continue;
            }

            match envelope.target {
                RelayTarget::Channel(channel) => {
                    self.deliver_to_channel(&channel, &envelope.event, None)
                }
                RelayTarget::AllConnections => self.deliver_to_all(&envelope.event),
            }
        }
    }
}

/// Resolve a domain event into its audience: one or more (target, wire
/// event) pairs. Exhaustive by construction.
fn resolve_targets(event: DomainEvent) -> Vec<(RelayTarget, ServerEvent)> {
    match event {
        DomainEvent::MessageCreated {
            message,
            friend_ids,
        } => {
            let mut out = Vec::with_capacity(1 + friend_ids.len());
            out.push((
                RelayTarget::Channel(room_channel(message.chat_room_id)),
                ServerEvent::NewMessage(message.clone()),
            ));
            // Every friend of the sender gets a notification on their
            // personal channel, whether or not they are in the room.
            for friend_id in friend_ids {
                out.push((
                    RelayTarget::Channel(personal_channel(friend_id)),
                    ServerEvent::MessageNotification(message.clone()),
                ));
            }
            out
        }
        DomainEvent::MessageDeleted {
            message_id,
            chat_room_id,
        } => vec![(
            RelayTarget::Channel(room_channel(chat_room_id)),
            ServerEvent::MessageDeleted {
                message_id,
                chat_room_id,
            },
        )],
        DomainEvent::MessageRead {
            message_id,
            user_id,
            chat_room_id,
            read_at,
        } => vec![(
            RelayTarget::Channel(room_channel(chat_room_id)),
            ServerEvent::MessageRead {
                message_id,
                user_id,
                read_at,
            },
        )],
        DomainEvent::TypingStarted {
            user_id,
            nickname,
            chat_room_id,
        } => vec![(
            RelayTarget::Channel(room_channel(chat_room_id)),
            ServerEvent::UserTyping {
                user_id,
                nickname,
                chat_room_id,
            },
        )],
        DomainEvent::TypingStopped {
            user_id,
            chat_room_id,
        } => vec![(
            RelayTarget::Channel(room_channel(chat_room_id)),
            ServerEvent::UserStopTyping {
                user_id,
                chat_room_id,
            },
        )],
        DomainEvent::PresenceChanged { user_id, online } => {
            let event = if online {
                ServerEvent::UserOnline { user_id }
            } else {
                ServerEvent::UserOffline { user_id }
            };
            vec![(RelayTarget::AllConnections, event)]
        }
        DomainEvent::RoomJoined {
            user_id,
            chat_room_id,
        } => vec![(
            RelayTarget::Channel(room_channel(chat_room_id)),
            ServerEvent::UserJoined {
                user_id,
                chat_room_id,
            },
        )],
        DomainEvent::RoomLeft {
            user_id,
            chat_room_id,
        } => vec![(
            RelayTarget::Channel(room_channel(chat_room_id)),
            ServerEvent::UserLeft {
                user_id,
                chat_room_id,
            },
        )],
    }
}

//! Domain events: immutable facts to be fanned out to subscribers.
//!
//! A closed enum dispatched by exhaustive match — adding an event kind
//! forces every resolver to handle it at compile time.

use crate::ws::protocol::MessagePayload;

#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// A message was persisted. Fans out to the room channel and, as a
    /// lighter `message_notification`, to every friend of the sender's
    /// personal channel (friends are resolved by the REST handler that
    /// already holds the DB lock).
    MessageCreated {
        message: MessagePayload,
        friend_ids: Vec<i64>,
    },
    /// A message was soft-deleted.
    MessageDeleted { message_id: i64, chat_room_id: i64 },
    /// A reader recorded a read receipt.
    MessageRead {
        message_id: i64,
        user_id: i64,
        chat_room_id: i64,
        read_at: String,
    },
    TypingStarted {
        user_id: i64,
        nickname: String,
        chat_room_id: i64,
    },
    TypingStopped { user_id: i64, chat_room_id: i64 },
    /// A user's aggregate online state flipped (0→1 or 1→0 connections).
    PresenceChanged { user_id: i64, online: bool },
    /// Informational: a connection joined/left a room channel.
    RoomJoined { user_id: i64, chat_room_id: i64 },
    RoomLeft { user_id: i64, chat_room_id: i64 },
}

use std::sync::Arc;

use crate::chat::fanout::FanoutEngine;
use crate::chat::presence::PresenceTracker;
use crate::db::DbPool;
use crate::ws::rooms::RoomMembership;
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Active WebSocket connections on this process
    pub registry: Arc<ConnectionRegistry>,
    /// Channel subscriptions for local connections
    pub rooms: Arc<RoomMembership>,
    /// Broker-backed fleet-wide presence
    pub presence: Arc<PresenceTracker>,
    /// Event fan-out engine (local delivery + broker relay)
    pub fanout: Arc<FanoutEngine>,
}

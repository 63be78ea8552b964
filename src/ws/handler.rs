use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth::jwt;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection.
/// Auth is via query param ?token=JWT.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: String,
}

/// WebSocket close codes:
/// 4001 = token expired
/// 4002 = token invalid (bad signature, or subject no longer resolvable)
const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. Authenticates via query parameter.
/// On auth failure, upgrades then immediately closes with appropriate close code.
/// On success, spawns an actor for the connection.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = match jwt::validate_access_token(&state.jwt_secret, &params.token) {
        Ok(claims) => claims,
        Err(err) => {
            let (close_code, reason) = match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    (CLOSE_TOKEN_EXPIRED, "Token expired")
                }
                _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
            };
            tracing::warn!(close_code, reason, "WebSocket auth failed");
            return close_after_upgrade(ws, close_code, reason);
        }
    };

    // The token subject must still resolve to a user. A deleted account's
    // otherwise-valid token does not get a connection.
    let db = state.db.clone();
    let user_id = claims.sub;
    let user_exists = tokio::task::spawn_blocking(move || {
        let conn = db.lock().ok()?;
        conn.query_row(
            "SELECT COUNT(*) FROM users WHERE id = ?1",
            rusqlite::params![user_id],
            |row| row.get::<_, i64>(0).map(|c| c > 0),
        )
        .ok()
    })
    .await
    .ok()
    .flatten()
    .unwrap_or(false);

    if !user_exists {
        tracing::warn!(user_id, "WebSocket auth failed: subject not resolvable");
        return close_after_upgrade(ws, CLOSE_TOKEN_INVALID, "Token invalid");
    }

    tracing::info!(user_id, "WebSocket connection authenticated");
    ws.on_upgrade(move |socket| handle_authenticated(socket, state, user_id))
}

/// Upgrade the connection, then immediately close with the error code.
fn close_after_upgrade(ws: WebSocketUpgrade, code: u16, reason: &'static str) -> Response {
    ws.on_upgrade(move |mut socket| async move {
        let close_frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        let _ = socket.send(Message::Close(Some(close_frame))).await;
    })
}

/// Handle an authenticated WebSocket connection by spawning the actor.
async fn handle_authenticated(socket: WebSocket, state: AppState, user_id: i64) {
    actor::run_connection(socket, state, user_id).await;
}

//! Friend requests and the friend list.
//!
//! Friendship is stored as a symmetric pair of rows so either side's
//! queries stay a single indexed lookup.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestBody {
    pub friend_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendSummary {
    pub id: i64,
    pub nickname: String,
    pub email: String,
    pub profile_image_url: Option<String>,
    pub status_message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingFriendRequest {
    pub sender: FriendSummary,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct FriendActionResponse {
    pub success: bool,
    pub message: String,
}

fn ok(message: &str) -> Json<FriendActionResponse> {
    Json(FriendActionResponse {
        success: true,
        message: message.to_string(),
    })
}

/// POST /api/friends/requests — send a friend request. JWT auth required.
/// 404 if the target does not exist, 400 if already friends or a request
/// between the pair is already pending.
pub async fn send_friend_request(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<FriendRequestBody>,
) -> Result<(StatusCode, Json<FriendActionResponse>), StatusCode> {
    let my_id = claims.sub;
    let friend_id = body.friend_id;
    if my_id == friend_id {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let target_exists: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE id = ?1",
                rusqlite::params![friend_id],
                |row| row.get::<_, i64>(0).map(|c| c > 0),
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        if !target_exists {
            return Err(StatusCode::NOT_FOUND);
        }

        let already_friends: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM friends WHERE user_id = ?1 AND friend_id = ?2",
                rusqlite::params![my_id, friend_id],
                |row| row.get::<_, i64>(0).map(|c| c > 0),
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        if already_friends {
            return Err(StatusCode::BAD_REQUEST);
        }

        let pending: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM friend_requests
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)",
                rusqlite::params![my_id, friend_id],
                |row| row.get::<_, i64>(0).map(|c| c > 0),
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        if pending {
            return Err(StatusCode::BAD_REQUEST);
        }

        conn.execute(
            "INSERT INTO friend_requests (sender_id, receiver_id, created_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![my_id, friend_id, Utc::now().to_rfc3339()],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        Ok(())
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok((StatusCode::CREATED, ok("Friend request sent")))
}

/// GET /api/friends/requests — incoming requests with sender profiles.
pub async fn list_incoming_requests(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<IncomingFriendRequest>>, StatusCode> {
    let db = state.db.clone();
    let my_id = claims.sub;

    let requests = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let mut stmt = conn
            .prepare(
                "SELECT u.id, u.nickname, u.email, u.profile_image_url, u.status_message,
                        fr.created_at
                 FROM friend_requests fr
                 JOIN users u ON u.id = fr.sender_id
                 WHERE fr.receiver_id = ?1
                 ORDER BY fr.created_at DESC",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let requests: Vec<IncomingFriendRequest> = stmt
            .query_map([my_id], |row| {
                Ok(IncomingFriendRequest {
                    sender: FriendSummary {
                        id: row.get(0)?,
                        nickname: row.get(1)?,
                        email: row.get(2)?,
                        profile_image_url: row.get(3)?,
                        status_message: row.get(4)?,
                    },
                    created_at: row.get(5)?,
                })
            })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();
        Ok::<_, StatusCode>(requests)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(requests))
}

/// POST /api/friends/requests/accept — accept an incoming request.
/// Removes the request and inserts the symmetric friend pair in one
/// transaction. 404 if no such request is pending.
pub async fn accept_friend_request(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<FriendRequestBody>,
) -> Result<Json<FriendActionResponse>, StatusCode> {
    let db = state.db.clone();
    let my_id = claims.sub;
    let friend_id = body.friend_id;

    tokio::task::spawn_blocking(move || {
        let mut conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let tx = conn
            .transaction()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let removed = tx
            .execute(
                "DELETE FROM friend_requests WHERE sender_id = ?1 AND receiver_id = ?2",
                rusqlite::params![friend_id, my_id],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        if removed == 0 {
            return Err(StatusCode::NOT_FOUND);
        }

        let now = Utc::now().to_rfc3339();
        for (a, b) in [(my_id, friend_id), (friend_id, my_id)] {
            tx.execute(
                "INSERT OR IGNORE INTO friends (user_id, friend_id, created_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![a, b, now],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        }

        tx.commit().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        Ok(())
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(ok("Friend request accepted"))
}

/// DELETE /api/friends/requests/{friendId} — reject an incoming request.
/// 404 if no such request is pending.
pub async fn reject_friend_request(
    State(state): State<AppState>,
    claims: Claims,
    Path(friend_id): Path<i64>,
) -> Result<Json<FriendActionResponse>, StatusCode> {
    let db = state.db.clone();
    let my_id = claims.sub;

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let removed = conn
            .execute(
                "DELETE FROM friend_requests WHERE sender_id = ?1 AND receiver_id = ?2",
                rusqlite::params![friend_id, my_id],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        if removed == 0 {
            return Err(StatusCode::NOT_FOUND);
        }
        Ok(())
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(ok("Friend request rejected"))
}

/// GET /api/friends — the caller's friend list.
pub async fn list_friends(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<FriendSummary>>, StatusCode> {
    let db = state.db.clone();
    let my_id = claims.sub;

    let friends = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let mut stmt = conn
            .prepare(
                "SELECT u.id, u.nickname, u.email, u.profile_image_url, u.status_message
                 FROM friends f
                 JOIN users u ON u.id = f.friend_id
                 WHERE f.user_id = ?1
                 ORDER BY u.nickname ASC",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let friends: Vec<FriendSummary> = stmt
            .query_map([my_id], |row| {
                Ok(FriendSummary {
                    id: row.get(0)?,
                    nickname: row.get(1)?,
                    email: row.get(2)?,
                    profile_image_url: row.get(3)?,
                    status_message: row.get(4)?,
                })
            })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();
        Ok::<_, StatusCode>(friends)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(friends))
}

/// DELETE /api/friends/{friendId} — remove a friendship (both rows).
/// 404 if the pair are not friends.
pub async fn remove_friend(
    State(state): State<AppState>,
    claims: Claims,
    Path(friend_id): Path<i64>,
) -> Result<Json<FriendActionResponse>, StatusCode> {
    let db = state.db.clone();
    let my_id = claims.sub;

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let removed = conn
            .execute(
                "DELETE FROM friends
                 WHERE (user_id = ?1 AND friend_id = ?2)
                    OR (user_id = ?2 AND friend_id = ?1)",
                rusqlite::params![my_id, friend_id],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        if removed == 0 {
            return Err(StatusCode::NOT_FOUND);
        }
        Ok(())
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(ok("Friend removed"))
}

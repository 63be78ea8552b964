//! User profiles: fetch, update, password change, and account removal.
//!
//! Profile fields (`nickname`, `statusMessage`, `profileImageUrl`) are
//! what the friend list, room member summaries, and message sender
//! embeds render from.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::accounts::BCRYPT_COST;
use crate::auth::middleware::Claims;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    pub nickname: String,
    pub profile_image_url: Option<String>,
    pub status_message: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub nickname: Option<String>,
    pub status_message: Option<String>,
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct UserActionResponse {
    pub success: bool,
    pub message: String,
}

fn load_profile(conn: &rusqlite::Connection, user_id: i64) -> Result<UserProfile, StatusCode> {
    conn.query_row(
        "SELECT id, email, nickname, profile_image_url, status_message, created_at
         FROM users WHERE id = ?1",
        rusqlite::params![user_id],
        |row| {
            Ok(UserProfile {
                id: row.get(0)?,
                email: row.get(1)?,
                nickname: row.get(2)?,
                profile_image_url: row.get(3)?,
                status_message: row.get(4)?,
                created_at: row.get(5)?,
            })
        },
    )
    .map_err(|_| StatusCode::NOT_FOUND)
}

/// GET /api/users/{id} — any authenticated user can view a profile.
pub async fn get_user(
    State(state): State<AppState>,
    _claims: Claims,
    Path(user_id): Path<i64>,
) -> Result<Json<UserProfile>, StatusCode> {
    let db = state.db.clone();
    let profile = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        load_profile(&conn, user_id)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(profile))
}

/// PATCH /api/users/{id} — update own profile fields. Only provided
/// fields change; 403 when editing someone else.
pub async fn update_user(
    State(state): State<AppState>,
    claims: Claims,
    Path(user_id): Path<i64>,
    Json(body): Json<UpdateProfileRequest>,
) -> Result<Json<UserProfile>, StatusCode> {
    if claims.sub != user_id {
        return Err(StatusCode::FORBIDDEN);
    }
    let nickname = match body.nickname {
        Some(n) => {
            let n = n.trim().to_string();
            if n.is_empty() {
                return Err(StatusCode::BAD_REQUEST);
            }
            Some(n)
        }
        None => None,
    };

    let db = state.db.clone();
    let profile = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let now = Utc::now().to_rfc3339();
        let changed = conn
            .execute(
                "UPDATE users SET
                     nickname = COALESCE(?1, nickname),
                     status_message = COALESCE(?2, status_message),
                     profile_image_url = COALESCE(?3, profile_image_url),
                     updated_at = ?4
                 WHERE id = ?5",
                rusqlite::params![
                    nickname,
                    body.status_message,
                    body.profile_image_url,
                    now,
                    user_id
                ],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        if changed == 0 {
            return Err(StatusCode::NOT_FOUND);
        }

        load_profile(&conn, user_id)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    tracing::info!(user_id, "Profile updated");
    Ok(Json(profile))
}

/// POST /api/users/{id}/password — change own password. 401 when the
/// current password does not verify.
pub async fn change_password(
    State(state): State<AppState>,
    claims: Claims,
    Path(user_id): Path<i64>,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<Json<UserActionResponse>, StatusCode> {
    if claims.sub != user_id {
        return Err(StatusCode::FORBIDDEN);
    }
    if body.new_password.len() < 4 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let stored_hash: String = conn
            .query_row(
                "SELECT password_hash FROM users WHERE id = ?1",
                rusqlite::params![user_id],
                |row| row.get(0),
            )
            .map_err(|_| StatusCode::NOT_FOUND)?;

        if !bcrypt::verify(&body.current_password, &stored_hash).unwrap_or(false) {
            return Err(StatusCode::UNAUTHORIZED);
        }

        let new_hash = bcrypt::hash(&body.new_password, BCRYPT_COST)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        conn.execute(
            "UPDATE users SET password_hash = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![new_hash, Utc::now().to_rfc3339(), user_id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        Ok(())
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    tracing::info!(user_id, "Password changed");
    Ok(Json(UserActionResponse {
        success: true,
        message: "Password changed".to_string(),
    }))
}

/// DELETE /api/users/{id} — remove own account. Friend edges, room
/// memberships, messages, and receipts go with it via foreign-key
/// cascade; any still-open WebSocket winds down on its next disconnect.
pub async fn delete_user(
    State(state): State<AppState>,
    claims: Claims,
    Path(user_id): Path<i64>,
) -> Result<Json<UserActionResponse>, StatusCode> {
    if claims.sub != user_id {
        return Err(StatusCode::FORBIDDEN);
    }

    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let removed = conn
            .execute("DELETE FROM users WHERE id = ?1", rusqlite::params![user_id])
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        if removed == 0 {
            return Err(StatusCode::NOT_FOUND);
        }
        Ok(())
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    tracing::info!(user_id, "Account deleted");
    Ok(Json(UserActionResponse {
        success: true,
        message: "Account deleted".to_string(),
    }))
}

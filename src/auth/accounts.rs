//! Account registration and login.
//!
//! Email/password accounts with bcrypt hashing. Both endpoints return a
//! short-lived HS256 access token used for REST calls and the WebSocket
//! handshake.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::jwt;
use crate::state::AppState;

pub(crate) const BCRYPT_COST: u32 = 10;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub nickname: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: i64,
    pub email: String,
    pub nickname: String,
    pub profile_image_url: Option<String>,
    pub status_message: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub user: UserResponse,
}

/// POST /api/auth/register — create an account and return an access token.
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), StatusCode> {
    let email = body.email.trim().to_lowercase();
    let nickname = body.nickname.trim().to_string();
    if email.is_empty() || nickname.is_empty() || body.password.len() < 4 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let password = body.password.clone();
    let email_for_insert = email.clone();
    let nickname_for_insert = nickname.clone();

    let user = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let exists: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE email = ?1",
                rusqlite::params![email_for_insert],
                |row| row.get::<_, i64>(0).map(|c| c > 0),
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        if exists {
            return Err(StatusCode::CONFLICT);
        }

        let hash = bcrypt::hash(&password, BCRYPT_COST)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO users (email, nickname, password_hash, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            rusqlite::params![email_for_insert, nickname_for_insert, hash, now],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let id = conn.last_insert_rowid();
        Ok(UserResponse {
            id,
            email: email_for_insert,
            nickname: nickname_for_insert,
            profile_image_url: None,
            status_message: None,
            created_at: now,
        })
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    let access_token = jwt::issue_access_token(&state.jwt_secret, user.id, &user.email)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    tracing::info!(user_id = user.id, "User registered");
    Ok((StatusCode::CREATED, Json(AuthResponse { access_token, user })))
}

/// POST /api/auth/login — verify credentials and return an access token.
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, StatusCode> {
    let email = body.email.trim().to_lowercase();
    let db = state.db.clone();
    let password = body.password.clone();

    let user = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let row: Result<(i64, String, String, Option<String>, Option<String>, String), _> = conn
            .query_row(
                "SELECT id, nickname, password_hash, profile_image_url, status_message, created_at
                 FROM users WHERE email = ?1",
                rusqlite::params![email],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            );

        let (id, nickname, password_hash, profile_image_url, status_message, created_at) =
            row.map_err(|_| StatusCode::UNAUTHORIZED)?;

        let valid = bcrypt::verify(&password, &password_hash).unwrap_or(false);
        if !valid {
            return Err(StatusCode::UNAUTHORIZED);
        }

        Ok(UserResponse {
            id,
            email,
            nickname,
            profile_image_url,
            status_message,
            created_at,
        })
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    let access_token = jwt::issue_access_token(&state.jwt_secret, user.id, &user.email)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(AuthResponse { access_token, user }))
}

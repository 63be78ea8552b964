use axum::{middleware, Router};
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::auth::accounts;
use crate::auth::middleware::JwtSecret;
use crate::chat::{messages, rooms_api};
use crate::friend;
use crate::state::AppState;
use crate::user;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Rate limiting: 5 requests per minute per IP on auth endpoints
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(12) // 1 token every 12 seconds = 5 per minute
            .burst_size(5) // Allow burst of 5
            .finish()
            .expect("Failed to build governor config"),
    );
    let governor_limiter = governor_config.limiter().clone();

    // Spawn background task to clean up rate limiter state
    let limiter_for_cleanup = governor_limiter.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            limiter_for_cleanup.retain_recent();
        }
    });

    // Auth routes with rate limiting
    let auth_routes = Router::new()
        .route(
            "/api/auth/register",
            axum::routing::post(accounts::register),
        )
        .route("/api/auth/login", axum::routing::post(accounts::login))
        .layer(GovernorLayer {
            config: governor_config,
        });

    // User profile routes (JWT required — Claims extractor validates token)
    let user_routes = Router::new()
        .route("/api/users/{id}", axum::routing::get(user::get_user))
        .route("/api/users/{id}", axum::routing::patch(user::update_user))
        .route(
            "/api/users/{id}/password",
            axum::routing::post(user::change_password),
        )
        .route("/api/users/{id}", axum::routing::delete(user::delete_user));

    // Friend routes (JWT required — Claims extractor validates token)
    let friend_routes = Router::new()
        .route(
            "/api/friends/requests",
            axum::routing::post(friend::send_friend_request),
        )
        .route(
            "/api/friends/requests",
            axum::routing::get(friend::list_incoming_requests),
        )
        .route(
            "/api/friends/requests/accept",
            axum::routing::post(friend::accept_friend_request),
        )
        .route(
            "/api/friends/requests/{friend_id}",
            axum::routing::delete(friend::reject_friend_request),
        )
        .route("/api/friends", axum::routing::get(friend::list_friends))
        .route(
            "/api/friends/{friend_id}",
            axum::routing::delete(friend::remove_friend),
        );

    // Chat room routes (JWT required)
    let chat_room_routes = Router::new()
        .route(
            "/api/chatrooms",
            axum::routing::post(rooms_api::create_chat_room),
        )
        .route(
            "/api/chatrooms/group",
            axum::routing::post(rooms_api::create_group_chat_room),
        )
        .route(
            "/api/chatrooms",
            axum::routing::get(rooms_api::list_my_chat_rooms),
        )
        .route(
            "/api/chatrooms/{id}",
            axum::routing::delete(rooms_api::delete_chat_room),
        )
        .route(
            "/api/chatrooms/{id}/messages",
            axum::routing::get(messages::list_messages),
        );

    // Message routes (JWT required)
    let message_routes = Router::new()
        .route("/api/messages", axum::routing::post(messages::create_message))
        .route(
            "/api/messages/{id}",
            axum::routing::delete(messages::delete_message),
        )
        .route(
            "/api/messages/{id}/read",
            axum::routing::post(messages::mark_read),
        );

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(auth_routes)
        .merge(user_routes)
        .merge(friend_routes)
        .merge(chat_room_routes)
        .merge(message_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

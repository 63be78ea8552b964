mod auth;
mod broker;
mod chat;
mod config;
mod db;
mod friend;
mod routes;
mod state;
mod user;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use broker::memory::MemoryBroker;
use chat::fanout::FanoutEngine;
use chat::presence::PresenceTracker;
use config::{generate_config_template, Config};
use ws::rooms::RoomMembership;
use ws::ConnectionRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "convo_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "convo_server=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("Convo server v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;

    // Load or generate JWT signing key (256-bit random, stored in data_dir)
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    // Per-process identity used to disambiguate presence records and to
    // skip our own relay frames.
    let process_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(%process_id, "Process identity assigned");

    // Coordination layer: connection registry, channel membership,
    // broker-backed presence, and the fan-out engine.
    let broker: Arc<dyn broker::Broker> = Arc::new(MemoryBroker::new());
    let registry = Arc::new(ConnectionRegistry::new());
    let rooms = Arc::new(RoomMembership::new());
    let presence = Arc::new(PresenceTracker::new(
        broker.clone(),
        process_id.clone(),
        Duration::from_secs(config.presence_ttl_secs),
    ));
    let fanout = Arc::new(FanoutEngine::new(
        registry.clone(),
        rooms.clone(),
        broker.clone(),
        process_id,
    ));

    // Consume relay frames published by sibling processes
    tokio::spawn(fanout.clone().run_relay());

    // Build application state
    let app_state = state::AppState {
        db,
        jwt_secret,
        registry,
        rooms,
        presence,
        fanout,
    };

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

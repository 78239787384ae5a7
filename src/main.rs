use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use greenroom_backend::api;
use greenroom_backend::auth::AuthService;
use greenroom_backend::config::Config;
use greenroom_backend::invitations::InvitationService;
use greenroom_backend::mail::Mailer;
use greenroom_backend::notify::Notifier;
use greenroom_backend::ratelimit::RateLimiter;
use greenroom_backend::registry::RoomRegistry;
use greenroom_backend::state::AppState;
use greenroom_backend::store::{
    create_pool, InvitationStore, MemoryInvitationStore, RedisInvitationStore,
};
use greenroom_backend::ws::{ws_routes, ConnectionsManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting Greenroom Backend...");

    // Load configuration
    let config = Arc::new(Config::from_env()?);
    tracing::info!(
        host = %config.server_host,
        port = %config.server_port,
        store = %config.store_backend,
        "Configuration loaded"
    );

    // Invitation store
    let store: Arc<dyn InvitationStore> = if config.store_backend == "memory" {
        tracing::warn!("Using in-memory invitation store; nothing survives a restart");
        Arc::new(MemoryInvitationStore::new())
    } else {
        let pool = create_pool(&config)?;
        let redis_store = RedisInvitationStore::new(pool);
        match redis_store.health_check().await {
            Ok(true) => tracing::info!("Redis connection established"),
            Ok(false) => tracing::warn!("Redis health check returned false"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to connect to Redis");
                // Continue anyway, might recover later
            }
        }
        Arc::new(redis_store)
    };

    // Core services
    let auth = Arc::new(AuthService::new(&config));
    let connections = Arc::new(ConnectionsManager::new());
    let registry = Arc::new(RoomRegistry::new(
        Notifier::new(connections.clone()),
        config.heartbeat_grace_seconds,
    ));
    let limiter = Arc::new(RateLimiter::new(
        config.redeem_attempts_per_window,
        Duration::from_secs(config.redeem_window_seconds),
    ));
    let mailer = Mailer::from_env_opt().map(Arc::new);
    let invitations = Arc::new(InvitationService::new(
        store.clone(),
        registry.clone(),
        limiter.clone(),
        auth.clone(),
        mailer,
        config.clone(),
    ));

    let state = AppState::new(
        config.clone(),
        auth,
        store,
        registry.clone(),
        invitations,
        connections,
        limiter.clone(),
    );

    // Idle reaper: the only proactive timer. Invitation expiry is lazy.
    {
        let registry = registry.clone();
        let limiter = limiter.clone();
        let interval = config.reaper_interval_seconds;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
            loop {
                ticker.tick().await;
                registry.reap_idle(chrono::Utc::now()).await;
                limiter.prune();
            }
        });
    }

    // Build router
    let app = Router::new()
        .merge(api::create_router(state.clone()))
        .merge(ws_routes().with_state(state))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr: SocketAddr = config.server_addr().parse()?;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(address = %addr, "Server listening");

    // Run server with graceful shutdown. Connect info feeds the
    // per-address rate limiter.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Handle shutdown signals
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, shutting down...");
        },
    }
}

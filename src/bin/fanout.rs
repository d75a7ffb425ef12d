//! `fundedtrader-fanout`: the WebSocket half of the platform (spec.md
//! §4.11/§4.12). Scales independently of `fundedtrader-core`, sharing only
//! Redis (session cache, ring membership, event bus) with it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use fundedtrader_backend::auth::SessionManager;
use fundedtrader_backend::cache::{Cache, RedisCache};
use fundedtrader_backend::config::FanoutConfig;
use fundedtrader_backend::db::postgres::PgStore;
use fundedtrader_backend::db::DurableStore;
use fundedtrader_backend::events::consumer::RedisEventSubscriber;
use fundedtrader_backend::events::consumer::EventSubscriber;
use fundedtrader_backend::fanout::connection::ConnectionManager;
use fundedtrader_backend::fanout::membership::RingMembership;
use fundedtrader_backend::fanout::ring::ConsistentHashRing;
use fundedtrader_backend::fanout::router::MessageRouter;
use fundedtrader_backend::fanout::{spawn_heartbeat, ws_handler, FanoutState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = FanoutConfig::from_env()?;
    tracing::info!(node_id = %config.node_id, port = config.port, "starting fundedtrader-fanout");

    let db: Arc<dyn DurableStore> = Arc::new(PgStore::connect(&config.database_url).await?);
    let cache: Arc<dyn Cache> = Arc::new(RedisCache::connect(&config.redis_url).await?);
    let sessions = Arc::new(SessionManager::new(db, cache.clone(), config.jwt_secret.clone()));

    let ring = Arc::new(ConsistentHashRing::new());
    let membership = RingMembership::new(cache.clone(), ring.clone(), config.node_id.clone());
    membership.join().await?;
    RingMembership::spawn_listener(ring.clone(), config.redis_url.clone());

    let connections = Arc::new(ConnectionManager::new());
    spawn_heartbeat(
        connections.clone(),
        Duration::from_millis(config.heartbeat_interval_ms),
        Duration::from_millis(config.connection_timeout_ms),
    );

    let router = MessageRouter::new(connections.clone(), ring.clone(), config.node_id.clone());
    let subscriber: Arc<dyn EventSubscriber> =
        Arc::new(RedisEventSubscriber::new(config.redis_url.clone()));
    tokio::spawn(async move {
        if let Err(e) = router.run(subscriber).await {
            tracing::error!(error = %e, "message router exited");
        }
    });

    let state = FanoutState {
        connections,
        ring: ring.clone(),
        sessions,
        node_id: config.node_id.clone(),
        heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
        connection_timeout: Duration::from_millis(config.connection_timeout_ms),
    };

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "fundedtrader-fanout listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown_ring = ring.clone();
    let shutdown_cache = cache.clone();
    let shutdown_node_id = config.node_id.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        let membership = RingMembership::new(shutdown_cache, shutdown_ring, shutdown_node_id);
        if let Err(e) = membership.leave().await {
            tracing::warn!(error = %e, "failed to deregister from fan-out ring on shutdown");
        }
    })
    .await?;

    Ok(())
}

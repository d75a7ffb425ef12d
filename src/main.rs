//! `fundedtrader-core`: the HTTP command surface, sagas, and periodic
//! workers (spec.md §4.1-4.10). The WebSocket fan-out half of the platform
//! is a separate binary, `fundedtrader-fanout` (`src/bin/fanout.rs`), so it
//! can scale independently.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use fundedtrader_backend::api::{admin, assessments, funded, health, purchases, tiers, trading, AppState};
use fundedtrader_backend::auth::{self, AuthState, SessionManager};
use fundedtrader_backend::cache::{Cache, RedisCache};
use fundedtrader_backend::concurrency::AssessmentLocks;
use fundedtrader_backend::config::CoreConfig;
use fundedtrader_backend::db::postgres::PgStore;
use fundedtrader_backend::db::DurableStore;
use fundedtrader_backend::events::consumer::RedisEventSubscriber;
use fundedtrader_backend::events::{core_consumer, EventBus, RedisEventBus};
use fundedtrader_backend::middleware::correlation_id;
use fundedtrader_backend::middleware::logging::request_logging;
use fundedtrader_backend::middleware::rate_limit::{
    rate_limit_middleware, RateLimitConfig, RateLimitLayer,
};
use fundedtrader_backend::oracle::{CacheOracle, Oracle};
use fundedtrader_backend::payment::{HttpPaymentProvider, PaymentProvider};
use fundedtrader_backend::sagas::execution_rates::ExecutionRates;
use fundedtrader_backend::sagas::Collaborators;
use fundedtrader_backend::workers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = CoreConfig::from_env()?;
    tracing::info!(node_id = %config.node_id, port = config.port, "starting fundedtrader-core");

    let db: Arc<dyn DurableStore> = Arc::new(PgStore::connect(&config.database_url).await?);
    let cache_dyn: Arc<dyn Cache> = Arc::new(RedisCache::connect(&config.redis_url).await?);
    let events: Arc<dyn EventBus> = Arc::new(RedisEventBus::new(cache_dyn.clone()));
    let oracle: Arc<dyn Oracle> = Arc::new(CacheOracle::new(cache_dyn.clone()));
    let payment: Arc<dyn PaymentProvider> = Arc::new(HttpPaymentProvider::new(
        config.payment_provider_base_url.clone(),
        config.payment_provider_api_key.clone(),
    ));

    let collab = Collaborators {
        cache: cache_dyn,
        db: db.clone(),
        events,
        oracle,
        payment,
        locks: Arc::new(AssessmentLocks::new()),
        execution_rates: ExecutionRates::default(),
    };

    let sessions = Arc::new(SessionManager::new(
        db.clone(),
        collab.cache.clone(),
        config.jwt_secret.clone(),
    ));

    let (_rules_monitor_handle, _rules_monitor_flush_handle) =
        workers::rules_monitor::spawn(collab.clone());
    let _rule_checks_persistence_handle =
        workers::rule_checks_persistence::spawn(collab.clone());
    let (_persistence_handle, persistence_health) = workers::persistence::spawn(collab.clone());

    let consumer_collab = collab.clone();
    let subscriber = Arc::new(RedisEventSubscriber::new(config.redis_url.clone()));
    tokio::spawn(async move {
        if let Err(e) = core_consumer::run(consumer_collab, subscriber).await {
            tracing::error!(error = %e, "core event consumer exited");
        }
    });

    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;

    let state = AppState {
        collab,
        sessions: sessions.clone(),
        persistence_health,
        node_id: config.node_id.clone(),
    };

    let auth_state = AuthState {
        db: state.collab.db.clone(),
        sessions: sessions.clone(),
    };
    let auth_router = Router::new()
        .route("/auth/register", post(auth::api::register))
        .route("/auth/login", post(auth::api::login))
        .route(
            "/auth/me",
            get(auth::api::me).route_layer(axum_middleware::from_fn_with_state(
                sessions.clone(),
                auth::auth_middleware,
            )),
        )
        .with_state(auth_state);

    let public_routes = Router::new()
        .route("/tiers", get(tiers::list_tiers))
        .route("/webhooks/stripe", post(purchases::stripe_webhook))
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/health/persistence", get(health::persistence_health))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route(
            "/purchases",
            post(purchases::create_purchase),
        )
        .route("/purchases/:id", get(purchases::get_purchase))
        .route(
            "/assessments",
            post(assessments::confirm_assessment).get(assessments::list_assessments),
        )
        .route("/assessments/:id", get(assessments::get_assessment))
        .route("/assessments/:id/start", post(assessments::start_assessment))
        .route("/assessments/:id/pause", post(assessments::pause_assessment))
        .route(
            "/assessments/:id/resume",
            post(assessments::resume_assessment),
        )
        .route(
            "/assessments/:id/abandon",
            post(assessments::abandon_assessment),
        )
        .route("/orders", post(trading::place_order))
        .route("/positions", get(trading::list_positions))
        .route("/positions/:id/close", post(trading::close_position))
        .route("/trades", get(trading::list_trades))
        .route("/rules", get(trading::get_rules))
        .route("/funded-accounts", get(funded::list_funded_accounts))
        .route("/funded-accounts/:id", get(funded::get_funded_account))
        .route("/funded-accounts/:id/withdraw", post(funded::withdraw))
        .route(
            "/admin/withdrawals/pending",
            get(admin::list_pending_withdrawals),
        )
        .route(
            "/admin/withdrawals/:id/approve",
            post(admin::approve_withdrawal),
        )
        .route(
            "/admin/withdrawals/:id/reject",
            post(admin::reject_withdrawal),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            sessions.clone(),
            auth::auth_middleware,
        ))
        .with_state(state.clone());

    let rate_limiter = RateLimitLayer::new(RateLimitConfig::default());
    {
        let rate_limiter = rate_limiter.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                rate_limiter.cleanup();
            }
        });
    }

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(auth_router)
        .route(
            "/metrics",
            get(move || {
                let handle = prometheus_handle.clone();
                async move { handle.render() }
            }),
        )
        .layer(axum_middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ))
        .layer(axum_middleware::from_fn(correlation_id))
        .layer(axum_middleware::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "fundedtrader-core listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

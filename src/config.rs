//! Per-binary configuration, loaded the way the teacher's `Config::from_env`
//! loads settings (SPEC_FULL.md §A.2): `dotenv().ok()` then
//! `std::env::var(..).unwrap_or_else/parse().unwrap_or(default)` for every
//! field, with a thin `clap` CLI layered on top whose flags override env
//! when passed.

use clap::Parser;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Config for `fundedtrader-core`: HTTP command surface, sagas, workers.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub port: u16,
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub payment_provider_base_url: String,
    pub payment_provider_api_key: String,
    pub rules_monitor_interval_ms: u64,
    pub persistence_worker_interval_ms: u64,
    pub rule_checks_worker_interval_ms: u64,
    pub order_saga_timeout_ms: u64,
    pub node_id: String,
}

#[derive(Parser, Debug)]
#[command(name = "fundedtrader-core")]
struct CoreArgs {
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    node_id: Option<String>,
}

impl CoreConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        let args = CoreArgs::parse();

        let port = args
            .port
            .unwrap_or_else(|| env_parse("PORT", 8080));
        let node_id = args
            .node_id
            .unwrap_or_else(|| env_or("NODE_ID", "core-1"));

        Ok(Self {
            port,
            database_url: env_or(
                "DATABASE_URL",
                "postgres://localhost/fundedtrader",
            ),
            redis_url: env_or("REDIS_URL", "redis://localhost:6379"),
            jwt_secret: env_or("JWT_SECRET", "dev-secret-change-me"),
            payment_provider_base_url: env_or(
                "PAYMENT_PROVIDER_BASE_URL",
                "https://api.stripe.com",
            ),
            payment_provider_api_key: env_or("PAYMENT_PROVIDER_API_KEY", ""),
            rules_monitor_interval_ms: env_parse("RULES_MONITOR_INTERVAL_MS", 1500),
            persistence_worker_interval_ms: env_parse("PERSISTENCE_WORKER_INTERVAL_MS", 5000),
            rule_checks_worker_interval_ms: env_parse("RULE_CHECKS_WORKER_INTERVAL_MS", 12000),
            order_saga_timeout_ms: env_parse("ORDER_SAGA_TIMEOUT_MS", 5000),
            node_id,
        })
    }
}

/// Config for `fundedtrader-fanout`: WebSocket endpoint + ring membership.
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    pub port: u16,
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub node_id: String,
    pub heartbeat_interval_ms: u64,
    pub connection_timeout_ms: u64,
    pub virtual_nodes_per_node: usize,
}

#[derive(Parser, Debug)]
#[command(name = "fundedtrader-fanout")]
struct FanoutArgs {
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    node_id: Option<String>,
}

impl FanoutConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        let args = FanoutArgs::parse();

        let port = args
            .port
            .unwrap_or_else(|| env_parse("FANOUT_PORT", 8081));
        let node_id = args.node_id.unwrap_or_else(|| {
            env_or(
                "NODE_ID",
                &format!("fanout-{}", uuid::Uuid::new_v4().simple()),
            )
        });

        Ok(Self {
            port,
            database_url: env_or("DATABASE_URL", "postgres://localhost/fundedtrader"),
            redis_url: env_or("REDIS_URL", "redis://localhost:6379"),
            jwt_secret: env_or("JWT_SECRET", "dev-secret-change-me"),
            node_id,
            heartbeat_interval_ms: env_parse("HEARTBEAT_INTERVAL_MS", 15000),
            connection_timeout_ms: env_parse("CONNECTION_TIMEOUT_MS", 45000),
            virtual_nodes_per_node: env_parse("VIRTUAL_NODES_PER_NODE", 150),
        })
    }
}

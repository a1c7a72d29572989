//! Process configuration loaded from environment variables.

/// Runtime configuration with sensible defaults.
///
/// Environment variables:
/// - `DATABASE_URL` — PostgreSQL connection string for the event log and
///   read model (default: `postgres://localhost/orders`)
/// - `DB_MAX_CONNECTIONS` — pool size (default: `10`)
/// - `KAFKA_BOOTSTRAP` — broker list (default: `localhost:9092`)
/// - `PUBLISHER_CLIENT_ID` — producer client id (default: `order-service`)
/// - `CONSUMER_GROUP_ID` — projector group (default: `order-projections`)
/// - `SNAPSHOT_EVERY` — snapshot period in events (default: `50`)
/// - `OUTBOX_SWEEP_SECS` — sweep interval (default: `30`)
/// - `METRICS_PORT` — Prometheus exporter port (default: `9090`)
/// - `RUST_LOG` — tracing filter (default: `info`)
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub kafka_bootstrap: String,
    pub publisher_client_id: String,
    pub consumer_group_id: String,
    pub snapshot_every: i64,
    pub outbox_sweep_secs: u64,
    pub metrics_port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/orders".to_string()),
            db_max_connections: env_parsed("DB_MAX_CONNECTIONS", 10),
            kafka_bootstrap: std::env::var("KAFKA_BOOTSTRAP")
                .unwrap_or_else(|_| "localhost:9092".to_string()),
            publisher_client_id: std::env::var("PUBLISHER_CLIENT_ID")
                .unwrap_or_else(|_| "order-service".to_string()),
            consumer_group_id: std::env::var("CONSUMER_GROUP_ID")
                .unwrap_or_else(|_| "order-projections".to_string()),
            snapshot_every: env_parsed("SNAPSHOT_EVERY", 50),
            outbox_sweep_secs: env_parsed("OUTBOX_SWEEP_SECS", 30),
            metrics_port: env_parsed("METRICS_PORT", 9090),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/orders".to_string(),
            db_max_connections: 10,
            kafka_bootstrap: "localhost:9092".to_string(),
            publisher_client_id: "order-service".to_string(),
            consumer_group_id: "order-projections".to_string(),
            snapshot_every: 50,
            outbox_sweep_secs: 30,
            metrics_port: 9090,
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

//! Order service process: projector, outbox sweeper, shared clients.

mod config;

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use event_store::PostgresEventStore;
use projections::{OrderProjection, PgReadModelStore, ProjectionConsumer};
use publisher::{HighWaterMarks, KafkaEventPublisher, OutboxSweeper};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use config::Config;

/// Waits for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let metrics_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.metrics_port));
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("failed to install Prometheus exporter");

    // Shared clients: one pool, one producer, one consumer for the process.
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    let event_store = PostgresEventStore::new(pool.clone());
    event_store
        .run_migrations()
        .await
        .expect("failed to run migrations");

    let marks = HighWaterMarks::new();
    let kafka_publisher = Arc::new(
        KafkaEventPublisher::builder()
            .bootstrap(&config.kafka_bootstrap)
            .client_id(&config.publisher_client_id)
            .marks(marks.clone())
            .build()
            .expect("failed to create event publisher"),
    );

    let read_model = PgReadModelStore::new(pool.clone());
    let projection = OrderProjection::new(read_model);
    let consumer = ProjectionConsumer::<PgReadModelStore>::builder()
        .bootstrap(&config.kafka_bootstrap)
        .group_id(&config.consumer_group_id)
        .build(projection)
        .expect("failed to create projection consumer");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consumer_task = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move {
            if let Err(e) = consumer.run(shutdown).await {
                tracing::error!(error = %e, "projection consumer failed");
            }
        }
    });

    let sweeper_task = tokio::spawn({
        let sweeper = OutboxSweeper::new(event_store.clone(), kafka_publisher.clone(), marks);
        let interval = Duration::from_secs(config.outbox_sweep_secs);
        let shutdown = shutdown_rx.clone();
        async move {
            sweeper.run(interval, shutdown).await;
        }
    });

    tracing::info!(
        kafka = %config.kafka_bootstrap,
        group = %config.consumer_group_id,
        "order service running"
    );

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    let _ = consumer_task.await;
    let _ = sweeper_task.await;

    if let Err(e) = kafka_publisher.drain(Duration::from_secs(5)) {
        tracing::warn!(error = %e, "producer drain failed");
    }
    pool.close().await;

    tracing::info!("order service shut down cleanly");
}

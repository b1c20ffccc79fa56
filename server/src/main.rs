//! User service HTTP server and event consumer.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use user_service_core::queue::MessageQueue;
use user_service_postgres::PostgresUserStore;
use user_service_redpanda::RedpandaQueue;
use user_service_runtime::{
    EventConsumer, EventPublisher, LoggingHandler, MetricsRecorder, UserService,
};
use user_service_server::{Application, Config};
use user_service_web::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "user_service=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting user service");

    let config = Config::from_env()?;
    info!(
        address = %config.server.address(),
        redpanda_brokers = %config.redpanda.brokers,
        queue = %config.redpanda.queue_name,
        "Configuration loaded"
    );

    let metrics = if config.metrics_enabled {
        let mut recorder = MetricsRecorder::new();
        recorder.install()?;
        recorder.handle()
    } else {
        None
    };

    info!("Connecting to user store database...");
    let store =
        PostgresUserStore::connect(&config.postgres.url, config.postgres.max_connections).await?;
    store.migrate().await?;
    info!("User store connected");

    info!("Connecting to Redpanda...");
    let queue: Arc<dyn MessageQueue> = Arc::new(
        RedpandaQueue::builder()
            .brokers(&config.redpanda.brokers)
            .consumer_group(&config.redpanda.consumer_group)
            .build()?,
    );

    let publisher = Arc::new(EventPublisher::new(
        Arc::clone(&queue),
        &config.redpanda.queue_name,
    ));
    // A failed declare is retried on the first publish
    if let Err(e) = publisher.ensure_declared().await {
        warn!(error = %e, queue = %config.redpanda.queue_name, "Could not declare queue at startup");
    }

    let service = UserService::new(Arc::new(store), publisher);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let drain_timeout = config.server.shutdown_timeout();
    let consumer = EventConsumer::new(
        queue,
        &config.redpanda.queue_name,
        Arc::new(LoggingHandler),
        shutdown_rx,
    )
    .with_drain_timeout(drain_timeout);

    let mut state = AppState::new(service);
    if let Some(handle) = metrics {
        state = state.with_metrics(handle);
    }

    let listener = tokio::net::TcpListener::bind(config.server.address()).await?;

    Application::new(
        listener,
        build_router(state),
        consumer,
        shutdown_tx,
        drain_timeout,
    )
    .run()
    .await
}

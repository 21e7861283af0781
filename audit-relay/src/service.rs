//! Process wiring
//!
//! Connects the queue and the store, starts the persister and serves HTTP
//! until shutdown. Connection failures after the configured retries are
//! returned to the caller, which stops the process.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{Config, QueueBackend},
    error::{sanitize_url, Error, Result},
    persister::Persister,
    queue::{jetstream, DeliveryQueue, JetStreamQueue, MemoryQueue},
    server::{self, Server},
    state::AppState,
    store::{pg, EventStore, MemoryEventStore, PgEventStore},
};

/// Connect to the configured delivery queue
pub async fn connect_queue(config: &Config) -> Result<Arc<dyn DeliveryQueue>> {
    match config.queue.backend {
        QueueBackend::Jetstream => {
            let nats = config.nats.as_ref().ok_or_else(|| {
                config_error("nats.url must be configured for the jetstream queue backend")
            })?;
            let client = jetstream::connect_client(nats).await?;
            let queue = JetStreamQueue::connect(client, &config.queue)
                .await?
                .with_pull_batch(config.persister.max_in_flight);
            Ok(Arc::new(queue))
        }
        QueueBackend::Memory => {
            tracing::warn!(
                queue = %config.queue.name,
                "Using the in-memory queue: queued events do not survive a restart"
            );
            Ok(Arc::new(MemoryQueue::new(config.queue.name.clone())))
        }
    }
}

/// Connect to the configured event store
///
/// The in-memory queue and the in-memory store only come as a pair. Its
/// sequences restart with the process, so a durable store fed from it would
/// outlive the ordering its deliveries were numbered in.
pub async fn connect_store(config: &Config) -> Result<Arc<dyn EventStore>> {
    match (&config.database, config.queue.backend) {
        (Some(database), QueueBackend::Jetstream) => {
            let pool = pg::connect_pool(database).await?;
            let store = PgEventStore::new(pool);
            store.initialize().await?;
            Ok(Arc::new(store))
        }
        (None, QueueBackend::Memory) => {
            tracing::warn!("Using the in-memory event store: events do not survive a restart");
            Ok(Arc::new(MemoryEventStore::new()))
        }
        (Some(_), QueueBackend::Memory) => Err(config_error(
            "the memory queue backend cannot feed a [database] store; use the jetstream backend",
        )),
        (None, QueueBackend::Jetstream) => Err(config_error("database.url must be configured")),
    }
}

fn config_error(message: &str) -> Error {
    Error::Config(Box::new(figment::Error::from(message.to_string())))
}

/// Run the service until SIGINT/SIGTERM
pub async fn run(config: Config) -> Result<()> {
    tracing::info!(
        queue_backend = ?config.queue.backend,
        queue = %config.queue.name,
        nats = %config.nats_url().map(sanitize_url).unwrap_or_else(|| "-".to_string()),
        database = %config.database_url().map(sanitize_url).unwrap_or_else(|| "-".to_string()),
        "Starting {}",
        config.service.name
    );

    let store = connect_store(&config).await?;
    let queue = connect_queue(&config).await?;

    let persister = Persister::new(queue.clone(), store.clone(), config.persister.clone());
    let state = AppState::new(config.clone(), queue, store, persister.stats());

    let app = match &config.auth {
        #[cfg(feature = "jwt")]
        Some(auth) => {
            let auth = crate::middleware::JwtAuth::new(auth)?;
            tracing::info!("Bearer JWT authentication enabled for /api routes");
            server::authenticated_router(state, auth)
        }
        #[cfg(not(feature = "jwt"))]
        Some(_) => return Err(config_error("[auth] is configured but the jwt feature is disabled")),
        None => server::router(state),
    };

    let shutdown = CancellationToken::new();
    let worker = persister.spawn(shutdown.clone());

    let served = Server::new(config.service.clone())
        .serve(app, shutdown.clone())
        .await;

    // Stop the persister even when the server failed to start
    shutdown.cancel();
    if let Err(e) = worker.await {
        tracing::error!("Persister task failed: {}", e);
    }

    served
}

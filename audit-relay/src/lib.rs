//! # audit-relay
//!
//! Audit event intake with a durable, at-least-once delivery pipeline.
//!
//! Clients submit events over HTTP. Intake validates them against the
//! [`registry`], normalizes them and enqueues them on a durable
//! [`queue::DeliveryQueue`]. The [`persister::Persister`] consumes the queue
//! and writes each event to an [`store::EventStore`] under a deterministic
//! identity, so redeliveries never create a second record. Slow or
//! unavailable storage never blocks the submitting caller.
//!
//! ```text
//! client -> intake -> delivery queue -> persister -> event store
//!                                          |
//!                                          +-> dead-letter queue
//! ```
//!
//! ## Backends
//!
//! - Queue: NATS JetStream (`events` feature) or in-memory
//! - Store: PostgreSQL (`database` feature) or in-memory
//!
//! ## Example
//!
//! ```rust,no_run
//! use audit_relay::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let queue = Arc::new(MemoryQueue::new("audit-events"));
//!     let store = Arc::new(MemoryEventStore::new());
//!
//!     let persister = Persister::new(queue.clone(), store.clone(), PersisterConfig::default());
//!     let state = AppState::new(Config::default(), queue, store, persister.stats());
//!
//!     let shutdown = CancellationToken::new();
//!     let worker = persister.spawn(shutdown.clone());
//!
//!     Server::new(ServiceConfig::default())
//!         .serve(router(state), shutdown)
//!         .await?;
//!     let _ = worker.await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod handlers;
pub mod health;
pub mod ids;
pub mod intake;
pub mod middleware;
pub mod observability;
pub mod persister;
pub mod queue;
pub mod registry;
pub mod server;
pub mod state;
pub mod store;

#[cfg(all(feature = "database", feature = "events"))]
pub mod service;

/// Commonly used types
pub mod prelude {
    pub use crate::config::{Config, PersisterConfig, QueueBackend, QueueConfig, ServiceConfig};
    pub use crate::error::{Error, IntakeError, QueueError, Result, StoreError};
    pub use crate::event::{Event, EventFields, EventId, EventSubmission};
    pub use crate::intake::{Intake, Submitted};
    pub use crate::observability::init_tracing;
    pub use crate::persister::{PersistOutcome, Persister, PipelineStats, StatsSnapshot};
    pub use crate::queue::{DeadLetter, DeadLetterReason, Delivery, DeliveryQueue, MemoryQueue};
    pub use crate::registry::{EventStatus, EventType};
    pub use crate::server::{router, Server};
    pub use crate::state::AppState;
    pub use crate::store::{EventStore, InsertOutcome, MemoryEventStore};

    #[cfg(feature = "events")]
    pub use crate::queue::JetStreamQueue;

    #[cfg(feature = "database")]
    pub use crate::store::PgEventStore;

    #[cfg(feature = "jwt")]
    pub use crate::middleware::{Claims, JwtAuth};

    #[cfg(feature = "jwt")]
    pub use crate::server::authenticated_router;

    pub use tokio_util::sync::CancellationToken;
}

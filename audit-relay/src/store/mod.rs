//! Event store trait and backend implementations
//!
//! The store is the system of record for persisted events. Inserts are
//! idempotent on the event identity: inserting an id that already exists
//! leaves the stored record untouched and reports [`InsertOutcome::Duplicate`].
//!
//! # Available Backends
//!
//! - [`MemoryEventStore`]: in-process, for tests and local development
//! - [`PgEventStore`] (`database` feature): PostgreSQL with `ON CONFLICT DO NOTHING`

use async_trait::async_trait;

use crate::error::StoreError;
use crate::event::{Event, EventId};

pub mod memory;

#[cfg(feature = "database")]
pub mod pg;

pub use memory::MemoryEventStore;

#[cfg(feature = "database")]
pub use pg::PgEventStore;

/// Result of an insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new record was written
    Inserted,
    /// A record with the same identity already existed
    Duplicate,
}

/// Trait for event persistence backends
///
/// Listing operations return events in persistence order.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert an event that already carries its identity
    async fn insert(&self, event: &Event) -> Result<InsertOutcome, StoreError>;

    /// All stored events
    async fn list(&self) -> Result<Vec<Event>, StoreError>;

    /// One event by identity
    async fn get(&self, id: EventId) -> Result<Option<Event>, StoreError>;

    /// All stored events whose type code equals `code`
    ///
    /// Codes outside the registry simply match nothing.
    async fn list_by_type(&self, code: i32) -> Result<Vec<Event>, StoreError>;

    /// Remove one event; returns whether it existed
    async fn delete(&self, id: EventId) -> Result<bool, StoreError>;

    /// Check store connectivity
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Identity of an event about to be inserted
pub(crate) fn require_identity(event: &Event) -> Result<EventId, StoreError> {
    event.id.ok_or_else(|| {
        StoreError::new(
            crate::error::StoreOperation::Insert,
            crate::error::StoreErrorKind::Other,
            "event has no identity assigned",
        )
    })
}

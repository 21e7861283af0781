//! In-memory event store

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{require_identity, EventStore, InsertOutcome};
use crate::error::{StoreError, StoreOperation};
use crate::event::{Event, EventId};

#[derive(Debug, Default)]
struct StoreState {
    events: Vec<Event>,
    unavailable: bool,
}

/// [`EventStore`] holding events in a vector, in insertion order
#[derive(Debug, Clone, Default)]
pub struct MemoryEventStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryEventStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every operation fails while unavailable
    pub fn set_available(&self, available: bool) {
        self.lock().unavailable = !available;
    }

    /// Number of stored events
    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    /// Whether the store holds no events
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn available(
        &self,
        operation: StoreOperation,
    ) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        let state = self.lock();
        if state.unavailable {
            return Err(
                StoreError::connection_failed("memory store is unavailable").during(operation),
            );
        }
        Ok(state)
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn insert(&self, event: &Event) -> Result<InsertOutcome, StoreError> {
        let id = require_identity(event)?;
        let mut state = self.available(StoreOperation::Insert)?;

        if state.events.iter().any(|e| e.id == Some(id)) {
            return Ok(InsertOutcome::Duplicate);
        }
        state.events.push(event.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn list(&self) -> Result<Vec<Event>, StoreError> {
        Ok(self.available(StoreOperation::Query)?.events.clone())
    }

    async fn get(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        let state = self.available(StoreOperation::Query)?;
        Ok(state.events.iter().find(|e| e.id == Some(id)).cloned())
    }

    async fn list_by_type(&self, code: i32) -> Result<Vec<Event>, StoreError> {
        let state = self.available(StoreOperation::Query)?;
        Ok(state
            .events
            .iter()
            .filter(|e| e.event_type.code() == code)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: EventId) -> Result<bool, StoreError> {
        let mut state = self.available(StoreOperation::Delete)?;
        let before = state.events.len();
        state.events.retain(|e| e.id != Some(id));
        Ok(state.events.len() != before)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.available(StoreOperation::Connect).map(|_| ())
    }
}

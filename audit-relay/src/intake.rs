//! Event intake
//!
//! Validates a submission against the registry, fills in submission-time
//! defaults, mints the event identity and enqueues the canonical event.
//! Intake never touches the event store.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::error::IntakeError;
use crate::event::{is_zero_time, Event, EventId, EventSubmission};
use crate::queue::{DeliveryQueue, EnqueueReceipt};
use crate::registry::{resolve_event_type, resolve_status};

/// A submission that was accepted and durably enqueued
#[derive(Debug, Clone, Serialize)]
pub struct Submitted {
    /// Identity the event will be stored under
    pub id: EventId,
    pub receipt: EnqueueReceipt,
    /// The event as it was enqueued
    pub event: Event,
}

/// Producer side of the pipeline
#[derive(Clone)]
pub struct Intake {
    queue: Arc<dyn DeliveryQueue>,
}

impl Intake {
    pub fn new(queue: Arc<dyn DeliveryQueue>) -> Self {
        Self { queue }
    }

    /// Validate, normalize and enqueue one submission
    ///
    /// Nothing is enqueued when validation fails.
    pub async fn submit(&self, submission: EventSubmission) -> Result<Submitted, IntakeError> {
        let event_time = submission
            .event_time
            .filter(|time| !is_zero_time(time))
            .unwrap_or_else(Utc::now);

        let event_type = resolve_event_type(&submission.event_type)?;
        let status = resolve_status(&submission.status)?;

        let mut event = Event::new(event_type, status, event_time, submission);
        let id = event.assign_identity(EventId::new());

        let payload =
            serde_json::to_vec(&event).map_err(|e| IntakeError::Malformed(e.to_string()))?;

        let receipt = self
            .queue
            .enqueue(payload)
            .await
            .map_err(IntakeError::DeliveryUnavailable)?;

        tracing::debug!(
            event_id = %id,
            queue = %receipt.queue,
            sequence = receipt.sequence,
            event_type = %event.event_type,
            service_name = %event.service_name,
            "Event enqueued"
        );

        Ok(Submitted { id, receipt, event })
    }
}

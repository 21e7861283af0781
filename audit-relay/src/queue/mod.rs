//! Delivery queue between intake and the persister
//!
//! The [`DeliveryQueue`] trait is the seam between producers and the single
//! consumer loop. Implementations provide:
//!
//! - **Durability**: `enqueue` returns only once the message is stored
//! - **At-least-once delivery**: unacknowledged messages are redelivered
//! - **Best-effort FIFO** per queue
//! - **Explicit acknowledgement**: every [`Delivery`] must be acked or nacked
//!
//! # Available Backends
//!
//! - [`MemoryQueue`]: in-process, for tests and local development
//! - [`JetStreamQueue`] (`events` feature): NATS JetStream work-queue stream
//!   with a durable pull consumer

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::error::QueueError;

pub mod memory;

#[cfg(feature = "events")]
pub mod jetstream;

pub use memory::MemoryQueue;

#[cfg(feature = "events")]
pub use jetstream::JetStreamQueue;

/// Lazy, infinite sequence of deliveries for one subscription
///
/// Dropping the stream ends the subscription; messages it delivered but that
/// were never acknowledged become eligible for redelivery.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, QueueError>>;

/// Confirmation that a message was durably enqueued
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnqueueReceipt {
    /// Queue the message was written to
    pub queue: String,
    /// Position assigned by the queue
    pub sequence: u64,
}

/// Durable, ordered, at-least-once message channel
#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    /// Well-known queue name
    fn name(&self) -> &str;

    /// Durably enqueue one message body
    async fn enqueue(&self, payload: Vec<u8>) -> Result<EnqueueReceipt, QueueError>;

    /// Start a subscription, resuming from the oldest unacknowledged message
    async fn subscribe(&self) -> Result<DeliveryStream, QueueError>;

    /// Route a message that will not be persisted to the dead-letter channel
    async fn dead_letter(&self, letter: DeadLetter) -> Result<(), QueueError>;

    /// Check broker connectivity
    async fn ping(&self) -> Result<(), QueueError>;
}

/// Backend-specific acknowledgement handle for one delivered message
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Commit: the message is removed from the queue
    async fn ack(&self) -> Result<(), QueueError>;

    /// Release the message for redelivery, optionally after a delay
    async fn nack(&self, delay: Option<Duration>) -> Result<(), QueueError>;

    /// Keep the claim alive: restarts the broker's redelivery timer
    async fn in_progress(&self) -> Result<(), QueueError>;
}

/// A message claimed by a subscription
pub struct Delivery {
    payload: Vec<u8>,
    key: u64,
    attempt: u64,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Create a delivery
    ///
    /// `key` must be stable across redeliveries of the same message and
    /// `attempt` starts at 1.
    pub fn new(payload: Vec<u8>, key: u64, attempt: u64, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            payload,
            key,
            attempt,
            acker,
        }
    }

    /// Raw message body
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Stable identifier of the message occurrence
    pub fn key(&self) -> u64 {
        self.key
    }

    /// How many times this message has been delivered, including this one
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Build a dead letter carrying this delivery's body
    pub fn dead_letter(
        &self,
        queue: &str,
        reason: DeadLetterReason,
        detail: impl Into<String>,
    ) -> DeadLetter {
        DeadLetter {
            queue: queue.to_string(),
            key: self.key,
            attempt: self.attempt,
            reason,
            detail: detail.into(),
            payload: self.payload.clone(),
        }
    }

    /// Signal that work on the message has started or is still running
    pub async fn in_progress(&self) -> Result<(), QueueError> {
        self.acker.in_progress().await
    }

    /// Acknowledge the message
    pub async fn ack(self) -> Result<(), QueueError> {
        self.acker.ack().await
    }

    /// Negatively acknowledge the message so it is redelivered
    pub async fn nack(self, delay: Option<Duration>) -> Result<(), QueueError> {
        self.acker.nack(delay).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("key", &self.key)
            .field("attempt", &self.attempt)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Why a message was removed from the primary queue without being persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// The body could not be deserialized into an event
    Malformed,
    /// The store kept failing until the retry ceiling was reached
    RetriesExhausted,
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed"),
            Self::RetriesExhausted => write!(f, "retries_exhausted"),
        }
    }
}

/// A dropped message, as routed to the dead-letter channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    /// Queue the message was taken from
    pub queue: String,
    /// Delivery key on that queue
    pub key: u64,
    /// Delivery attempt at which it was dropped
    pub attempt: u64,
    pub reason: DeadLetterReason,
    /// Last error seen
    pub detail: String,
    /// Original message body, unmodified
    pub payload: Vec<u8>,
}

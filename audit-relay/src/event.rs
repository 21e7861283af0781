//! Audit event data model
//!
//! [`EventSubmission`] is what clients post; [`Event`] is the canonical form
//! that travels through the delivery queue and is persisted. Intake mints the
//! identity before enqueueing, so the queued and the stored form are the same
//! and a redelivered message maps onto the record its first delivery wrote.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::registry::{EventStatus, EventType};

/// Free-form, pass-through event payload
pub type EventFields = Map<String, Value>;

/// Identity of a persisted event
///
/// Rendered as a hyphenated UUID string on the wire and in URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Mint a fresh identity for a new submission
    ///
    /// Time-ordered (UUIDv7), so ids of a single intake sort by arrival.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Identity for a queued message that arrived without one
    ///
    /// Hashes the queue name, the delivery sequence and the body. Every
    /// redelivery of the message yields the same id, while a different body
    /// that later lands on a reused sequence does not.
    pub fn derive(queue: &str, sequence: u64, payload: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(queue.as_bytes());
        hasher.update(b":");
        hasher.update(&sequence.to_be_bytes());
        hasher.update(b":");
        hasher.update(payload);
        let digest = hasher.finalize();

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest.as_bytes()[..16]);
        Self(uuid::Builder::from_custom_bytes(bytes).into_uuid())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for EventId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Inbound submission, before code resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSubmission {
    /// Registered event type name, e.g. `customer_created`
    pub event_type: String,

    /// When the event happened; absent or zero means "now"
    #[serde(default)]
    pub event_time: Option<DateTime<Utc>>,

    /// Submitting user
    pub user_id: String,

    /// Originating service
    pub service_name: String,

    /// Registered status name, e.g. `success`
    pub status: String,

    #[serde(default)]
    pub event_fields: EventFields,
}

/// Canonical audit event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Set once, at intake; doubles as the idempotency key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EventId>,

    pub event_type: EventType,

    pub event_time: DateTime<Utc>,

    pub user_id: String,

    pub service_name: String,

    pub status: EventStatus,

    #[serde(default)]
    pub event_fields: EventFields,
}

impl Event {
    /// Build an event without identity from a resolved submission
    pub fn new(
        event_type: EventType,
        status: EventStatus,
        event_time: DateTime<Utc>,
        submission: EventSubmission,
    ) -> Self {
        Self {
            id: None,
            event_type,
            event_time,
            user_id: submission.user_id,
            service_name: submission.service_name,
            status,
            event_fields: submission.event_fields,
        }
    }

    /// Assign identity unless one is already set
    ///
    /// Returns the identity the event carries afterwards.
    pub fn assign_identity(&mut self, id: EventId) -> EventId {
        *self.id.get_or_insert(id)
    }
}

/// Whether a submitted timestamp should be treated as "not provided"
///
/// Only `0001-01-01T00:00:00Z`, the zero time many client SDKs emit for unset
/// fields, counts. The Unix epoch is a real timestamp.
pub fn is_zero_time(time: &DateTime<Utc>) -> bool {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|zero| time.naive_utc() == zero)
        .unwrap_or(false)
}

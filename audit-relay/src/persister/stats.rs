//! Pipeline counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals for the persister, shared with the HTTP layer
#[derive(Debug, Default)]
pub struct PipelineStats {
    persisted: AtomicU64,
    duplicates: AtomicU64,
    malformed: AtomicU64,
    dead_lettered: AtomicU64,
    store_failures: AtomicU64,
    ack_failures: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Messages written to the store
    pub persisted: u64,
    /// Redeliveries whose record already existed
    pub duplicates: u64,
    /// Messages that could not be deserialized
    pub malformed: u64,
    /// Messages routed to the dead-letter channel, for any reason
    pub dead_lettered: u64,
    /// Failed or timed-out store inserts
    pub store_failures: u64,
    /// Acks or nacks the queue did not accept
    pub ack_failures: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_persisted(&self) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ack_failure(&self) {
        self.ack_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            persisted: self.persisted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
        }
    }
}

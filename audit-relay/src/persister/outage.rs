//! Store outage tracking
//!
//! Counts consecutive store failures and reports an outage once failures
//! have persisted for longer than a threshold. A recovery is reported on the
//! first success after an outage was reported.

use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Internal state protected by a `std::sync::Mutex`
///
/// The mutex is never held across `.await` points.
#[derive(Debug, Default)]
struct TrackerState {
    /// Monotonic timestamp of the first failure in the current outage
    first_failure_at: Option<Instant>,
    /// Wall-clock time of the first failure, for log output
    first_failure_wall: Option<DateTime<Utc>>,
    consecutive_failures: u64,
    /// Whether an outage has been reported and not yet recovered
    alert_active: bool,
}

/// Outcome of recording a store result
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OutageTransition {
    /// Nothing noteworthy
    None,
    /// Failures crossed the threshold
    Started {
        consecutive_failures: u64,
        since: DateTime<Utc>,
    },
    /// The store answered again after a reported outage
    Recovered {
        consecutive_failures: u64,
        outage_secs: u64,
    },
}

/// Tracks consecutive store failures
#[derive(Debug)]
pub(crate) struct OutageTracker {
    state: Mutex<TrackerState>,
    threshold: Duration,
}

impl OutageTracker {
    pub(crate) fn new(threshold: Duration) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            threshold,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a failed store operation
    pub(crate) fn record_failure(&self, error: &str) -> OutageTransition {
        let transition = {
            let mut state = self.lock();
            let now = Instant::now();

            let first = *state.first_failure_at.get_or_insert(now);
            let since = *state.first_failure_wall.get_or_insert_with(Utc::now);
            state.consecutive_failures += 1;

            if !state.alert_active && now.duration_since(first) >= self.threshold {
                state.alert_active = true;
                OutageTransition::Started {
                    consecutive_failures: state.consecutive_failures,
                    since,
                }
            } else {
                OutageTransition::None
            }
        };

        if let OutageTransition::Started {
            consecutive_failures,
            since,
        } = &transition
        {
            tracing::error!(
                alert = true,
                consecutive_failures = *consecutive_failures,
                since = %since,
                last_error = %error,
                "Event store unreachable, messages are being held in the delivery queue"
            );
        }

        transition
    }

    /// Record a successful store operation
    pub(crate) fn record_success(&self) -> OutageTransition {
        let transition = {
            let mut state = self.lock();
            let transition = match (state.alert_active, state.first_failure_at) {
                (true, Some(first)) => OutageTransition::Recovered {
                    consecutive_failures: state.consecutive_failures,
                    outage_secs: first.elapsed().as_secs(),
                },
                _ => OutageTransition::None,
            };
            *state = TrackerState::default();
            transition
        };

        if let OutageTransition::Recovered {
            consecutive_failures,
            outage_secs,
        } = &transition
        {
            tracing::info!(
                consecutive_failures = *consecutive_failures,
                outage_secs = *outage_secs,
                "Event store recovered"
            );
        }

        transition
    }

    /// Consecutive failures in the current streak
    #[cfg(test)]
    pub(crate) fn consecutive_failures(&self) -> u64 {
        self.lock().consecutive_failures
    }
}

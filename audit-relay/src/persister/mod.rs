//! Event persister
//!
//! The persister is the single consumption loop of the pipeline. For every
//! delivery it:
//!
//! 1. Deserializes the body into an [`Event`]. Bodies that do not parse are
//!    poison messages: they are dead-lettered (best effort) and acknowledged.
//! 2. Keeps the identity minted at intake. A message without one gets an
//!    identity hashed from the queue, delivery key and body.
//! 3. Refreshes the claim on the message, then inserts the event under a
//!    timeout shorter than the queue's ack wait. Inserted and duplicate
//!    outcomes are acknowledged.
//! 4. On store failure the delivery is nacked with a redelivery delay, unless
//!    it has reached the retry ceiling, in which case it is dead-lettered and
//!    then acknowledged.
//!
//! Cancelling the shutdown token stops fetching new deliveries; deliveries
//! already being handled still reach their ack/nack decision.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PersisterConfig;
use crate::error::{StoreError, StoreOperation};
use crate::event::{Event, EventId};
use crate::queue::{DeadLetterReason, Delivery, DeliveryQueue, DeliveryStream};
use crate::store::{EventStore, InsertOutcome};

mod outage;
mod stats;

use outage::OutageTracker;
pub use stats::{PipelineStats, StatsSnapshot};

/// First delay before re-subscribing after the delivery stream broke
const RESUBSCRIBE_INITIAL_BACKOFF: Duration = Duration::from_millis(250);
/// Upper bound for the re-subscribe delay
const RESUBSCRIBE_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// What happened to one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Written to the store and acknowledged
    Persisted(EventId),
    /// Already in the store from an earlier delivery; acknowledged
    Duplicate(EventId),
    /// Body could not be deserialized; dropped
    Malformed,
    /// Store failed; left for redelivery
    Retrying,
    /// Store kept failing up to the retry ceiling; dead-lettered and dropped
    DeadLettered,
}

/// Consumes the delivery queue and writes events to the store
#[derive(Clone)]
pub struct Persister {
    queue: Arc<dyn DeliveryQueue>,
    store: Arc<dyn EventStore>,
    config: PersisterConfig,
    stats: Arc<PipelineStats>,
    outages: Arc<OutageTracker>,
}

impl Persister {
    pub fn new(
        queue: Arc<dyn DeliveryQueue>,
        store: Arc<dyn EventStore>,
        config: PersisterConfig,
    ) -> Self {
        let outages = OutageTracker::new(Duration::from_secs(config.outage_alert_secs));
        Self {
            queue,
            store,
            config,
            stats: Arc::new(PipelineStats::new()),
            outages: Arc::new(outages),
        }
    }

    /// Shared counters, updated as deliveries are handled
    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    /// Run [`Persister::run`] on a background task
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Consume until `shutdown` is cancelled
    ///
    /// A failed or exhausted subscription is re-established with capped
    /// exponential backoff.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut backoff = RESUBSCRIBE_INITIAL_BACKOFF;

        tracing::info!(
            queue = %self.queue.name(),
            max_in_flight = self.config.max_in_flight,
            max_deliveries = self.config.max_deliveries,
            "Persister started"
        );

        while !shutdown.is_cancelled() {
            match self.queue.subscribe().await {
                Ok(stream) => {
                    backoff = RESUBSCRIBE_INITIAL_BACKOFF;
                    self.consume(stream, &shutdown).await;
                    if shutdown.is_cancelled() {
                        break;
                    }
                    tracing::warn!(
                        queue = %self.queue.name(),
                        "Delivery stream ended, re-subscribing in {:?}",
                        backoff
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        queue = %self.queue.name(),
                        error = %e,
                        "Subscription failed, retrying in {:?}",
                        backoff
                    );
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(RESUBSCRIBE_MAX_BACKOFF);
        }

        tracing::info!(queue = %self.queue.name(), "Persister stopped");
    }

    /// Drain one subscription until it fails, ends, or shutdown is requested
    async fn consume(&self, stream: DeliveryStream, shutdown: &CancellationToken) {
        let queue = self.queue.name().to_string();

        stream
            .take_until(shutdown.cancelled())
            .take_while(|item| {
                if let Err(e) = item {
                    tracing::warn!(queue = %queue, error = %e, "Delivery stream failed");
                }
                futures::future::ready(item.is_ok())
            })
            .filter_map(|item| futures::future::ready(item.ok()))
            .for_each_concurrent(self.config.max_in_flight.max(1), |delivery| async move {
                self.handle(delivery).await;
            })
            .await;
    }

    /// Process one delivery to its ack/nack decision
    pub async fn handle(&self, delivery: Delivery) -> PersistOutcome {
        let key = delivery.key();
        let attempt = delivery.attempt();

        // Restart the ack-wait timer, which has been running since the
        // message was pulled into the client buffer
        if let Err(e) = delivery.in_progress().await {
            tracing::warn!(key, attempt, error = %e, "Failed to extend message claim");
        }

        let mut event: Event = match serde_json::from_slice(delivery.payload()) {
            Ok(event) => event,
            Err(e) => return self.drop_malformed(delivery, e.to_string()).await,
        };

        let id = match event.id {
            Some(id) => id,
            None => event.assign_identity(EventId::derive(
                self.queue.name(),
                key,
                delivery.payload(),
            )),
        };

        let result = match tokio::time::timeout(
            self.config.insert_timeout(),
            self.store.insert(&event),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StoreError::timeout(
                StoreOperation::Insert,
                format!("insert did not complete within {:?}", self.config.insert_timeout()),
            )),
        };

        match result {
            Ok(outcome) => {
                self.outages.record_success();
                let outcome = match outcome {
                    InsertOutcome::Inserted => {
                        self.stats.record_persisted();
                        tracing::debug!(event_id = %id, key, attempt, "Event persisted");
                        PersistOutcome::Persisted(id)
                    }
                    InsertOutcome::Duplicate => {
                        self.stats.record_duplicate();
                        tracing::info!(
                            event_id = %id,
                            key,
                            attempt,
                            "Event already persisted by an earlier delivery"
                        );
                        PersistOutcome::Duplicate(id)
                    }
                };
                self.ack(delivery).await;
                outcome
            }
            Err(e) => self.store_failed(delivery, e).await,
        }
    }

    async fn drop_malformed(&self, delivery: Delivery, error: String) -> PersistOutcome {
        self.stats.record_malformed();
        tracing::warn!(
            key = delivery.key(),
            attempt = delivery.attempt(),
            error = %error,
            "Dropping malformed message"
        );

        let letter = delivery.dead_letter(self.queue.name(), DeadLetterReason::Malformed, error);
        match self.queue.dead_letter(letter).await {
            Ok(()) => self.stats.record_dead_lettered(),
            Err(e) => tracing::error!(
                key = delivery.key(),
                error = %e,
                "Failed to dead-letter malformed message, dropping it anyway"
            ),
        }

        self.ack(delivery).await;
        PersistOutcome::Malformed
    }

    async fn store_failed(&self, delivery: Delivery, error: StoreError) -> PersistOutcome {
        let key = delivery.key();
        let attempt = delivery.attempt();

        self.stats.record_store_failure();
        self.outages.record_failure(&error.to_string());

        let exhausted = self
            .config
            .retry_ceiling()
            .is_some_and(|ceiling| attempt >= ceiling);

        if exhausted {
            let letter = delivery.dead_letter(
                self.queue.name(),
                DeadLetterReason::RetriesExhausted,
                error.to_string(),
            );
            match self.queue.dead_letter(letter).await {
                Ok(()) => {
                    self.stats.record_dead_lettered();
                    tracing::error!(
                        key,
                        attempt,
                        error = %error,
                        "Retry ceiling reached, message dead-lettered"
                    );
                    self.ack(delivery).await;
                    return PersistOutcome::DeadLettered;
                }
                Err(e) => {
                    tracing::error!(
                        key,
                        attempt,
                        error = %e,
                        "Retry ceiling reached but dead-lettering failed, keeping message"
                    );
                }
            }
        } else {
            tracing::warn!(
                key,
                attempt,
                operation = %error.operation,
                kind = %error.kind,
                error = %error.message,
                "Store insert failed, message left for redelivery"
            );
        }

        self.nack(delivery).await;
        PersistOutcome::Retrying
    }

    async fn ack(&self, delivery: Delivery) {
        let key = delivery.key();
        if let Err(e) = delivery.ack().await {
            self.stats.record_ack_failure();
            tracing::error!(key, error = %e, "Failed to acknowledge message");
        }
    }

    async fn nack(&self, delivery: Delivery) {
        let key = delivery.key();
        if let Err(e) = delivery.nack(Some(self.config.redelivery_delay())).await {
            self.stats.record_ack_failure();
            tracing::error!(key, error = %e, "Failed to release message for redelivery");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreErrorKind;
    use crate::queue::MemoryQueue;
    use crate::registry::{EventStatus, EventType};
    use crate::store::MemoryEventStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config() -> PersisterConfig {
        PersisterConfig {
            insert_timeout_ms: 1_000,
            redelivery_delay_ms: 0,
            max_deliveries: 3,
            max_in_flight: 1,
            outage_alert_secs: 0,
        }
    }

    fn event() -> Event {
        Event {
            id: Some(EventId::new()),
            event_type: EventType::CustomerCreated,
            event_time: Utc::now(),
            user_id: "u-1".to_string(),
            service_name: "billing".to_string(),
            status: EventStatus::Success,
            event_fields: serde_json::json!({"plan": "pro"})
                .as_object()
                .cloned()
                .unwrap(),
        }
    }

    async fn next(stream: &mut DeliveryStream) -> Delivery {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap()
    }

    /// Fails the first `failures` inserts, then delegates
    struct FlakyStore {
        inner: MemoryEventStore,
        failures: AtomicUsize,
    }

    impl FlakyStore {
        fn new(failures: usize) -> Self {
            Self {
                inner: MemoryEventStore::new(),
                failures: AtomicUsize::new(failures),
            }
        }
    }

    #[async_trait]
    impl EventStore for FlakyStore {
        async fn insert(&self, event: &Event) -> Result<InsertOutcome, StoreError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::connection_failed("connection refused"));
            }
            self.inner.insert(event).await
        }
        async fn list(&self) -> Result<Vec<Event>, StoreError> {
            self.inner.list().await
        }
        async fn get(&self, id: EventId) -> Result<Option<Event>, StoreError> {
            self.inner.get(id).await
        }
        async fn list_by_type(&self, code: i32) -> Result<Vec<Event>, StoreError> {
            self.inner.list_by_type(code).await
        }
        async fn delete(&self, id: EventId) -> Result<bool, StoreError> {
            self.inner.delete(id).await
        }
        async fn ping(&self) -> Result<(), StoreError> {
            self.inner.ping().await
        }
    }

    /// Never answers within any reasonable timeout
    struct StalledStore;

    #[async_trait]
    impl EventStore for StalledStore {
        async fn insert(&self, _event: &Event) -> Result<InsertOutcome, StoreError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(InsertOutcome::Inserted)
        }
        async fn list(&self) -> Result<Vec<Event>, StoreError> {
            Ok(Vec::new())
        }
        async fn get(&self, _id: EventId) -> Result<Option<Event>, StoreError> {
            Ok(None)
        }
        async fn list_by_type(&self, _code: i32) -> Result<Vec<Event>, StoreError> {
            Ok(Vec::new())
        }
        async fn delete(&self, _id: EventId) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_persists_and_acks() {
        let queue = Arc::new(MemoryQueue::new("audit-events"));
        let store = Arc::new(MemoryEventStore::new());
        let persister = Persister::new(queue.clone(), store.clone(), config());

        let queued = event();
        queue
            .enqueue(serde_json::to_vec(&queued).unwrap())
            .await
            .unwrap();

        let mut stream = queue.subscribe().await.unwrap();
        let outcome = persister.handle(next(&mut stream).await).await;

        let expected_id = queued.id.unwrap();
        assert_eq!(outcome, PersistOutcome::Persisted(expected_id));
        assert_eq!(queue.depth(), 0);

        let stored = store.get(expected_id).await.unwrap().unwrap();
        assert_eq!(stored, queued);
        assert_eq!(persister.stats().snapshot().persisted, 1);
    }

    #[tokio::test]
    async fn test_message_without_identity_gets_derived_one() {
        let queue = Arc::new(MemoryQueue::new("audit-events"));
        let store = Arc::new(MemoryEventStore::new());
        let persister = Persister::new(queue.clone(), store.clone(), config());

        let mut anonymous = event();
        anonymous.id = None;
        let payload = serde_json::to_vec(&anonymous).unwrap();
        queue.enqueue(payload.clone()).await.unwrap();

        let mut stream = queue.subscribe().await.unwrap();
        let outcome = persister.handle(next(&mut stream).await).await;

        let expected_id = EventId::derive("audit-events", 1, &payload);
        assert_eq!(outcome, PersistOutcome::Persisted(expected_id));
        assert!(store.get(expected_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_restarted_queue_does_not_shadow_stored_events() {
        use crate::event::EventSubmission;
        use crate::intake::Intake;

        let store = Arc::new(MemoryEventStore::new());

        // Each run starts a fresh queue whose sequences begin at 1 again
        for user in ["alice", "bob"] {
            let queue = Arc::new(MemoryQueue::new("audit-events"));
            let intake = Intake::new(queue.clone());
            let persister = Persister::new(queue.clone(), store.clone(), config());

            let submission: EventSubmission = serde_json::from_value(serde_json::json!({
                "event_type": "customer_created",
                "status": "success",
                "user_id": user,
                "service_name": "billing"
            }))
            .unwrap();
            let submitted = intake.submit(submission).await.unwrap();
            assert_eq!(submitted.receipt.sequence, 1);

            let mut stream = queue.subscribe().await.unwrap();
            let outcome = persister.handle(next(&mut stream).await).await;
            assert!(matches!(outcome, PersistOutcome::Persisted(_)));
            assert_eq!(queue.depth(), 0);
        }

        let mut users: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.user_id)
            .collect();
        users.sort();
        assert_eq!(users, ["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_redelivery_after_unacked_insert_is_duplicate() {
        let queue = Arc::new(MemoryQueue::new("audit-events"));
        let store = Arc::new(MemoryEventStore::new());
        let persister = Persister::new(queue.clone(), store.clone(), config());

        let queued = event();
        queue
            .enqueue(serde_json::to_vec(&queued).unwrap())
            .await
            .unwrap();

        // First consumer inserts, then "crashes" before acknowledging
        {
            let mut stream = queue.subscribe().await.unwrap();
            let delivery = next(&mut stream).await;
            let event: Event = serde_json::from_slice(delivery.payload()).unwrap();
            store.insert(&event).await.unwrap();
        }

        let mut stream = queue.subscribe().await.unwrap();
        let outcome = persister.handle(next(&mut stream).await).await;

        assert_eq!(outcome, PersistOutcome::Duplicate(queued.id.unwrap()));
        assert_eq!(store.len(), 1);
        assert_eq!(queue.depth(), 0);
        assert_eq!(persister.stats().snapshot().duplicates, 1);
    }

    #[tokio::test]
    async fn test_malformed_message_is_dropped() {
        let queue = Arc::new(MemoryQueue::new("audit-events"));
        let store = Arc::new(MemoryEventStore::new());
        let persister = Persister::new(queue.clone(), store.clone(), config());

        queue.enqueue(b"{not json".to_vec()).await.unwrap();
        queue
            .enqueue(br#"{"event_type": 77, "status": 100}"#.to_vec())
            .await
            .unwrap();

        let mut stream = queue.subscribe().await.unwrap();
        assert_eq!(
            persister.handle(next(&mut stream).await).await,
            PersistOutcome::Malformed
        );
        assert_eq!(
            persister.handle(next(&mut stream).await).await,
            PersistOutcome::Malformed
        );

        assert!(store.is_empty());
        assert_eq!(queue.depth(), 0);

        let letters = queue.dead_letters();
        assert_eq!(letters.len(), 2);
        assert!(letters
            .iter()
            .all(|l| l.reason == DeadLetterReason::Malformed));
        assert_eq!(letters[0].payload, b"{not json");

        let stats = persister.stats().snapshot();
        assert_eq!(stats.malformed, 2);
        assert_eq!(stats.dead_lettered, 2);
    }

    #[tokio::test]
    async fn test_malformed_message_dropped_when_dead_letter_fails() {
        let queue = Arc::new(MemoryQueue::new("audit-events"));
        let store = Arc::new(MemoryEventStore::new());
        let persister = Persister::new(queue.clone(), store, config());

        queue.enqueue(b"garbage".to_vec()).await.unwrap();
        let mut stream = queue.subscribe().await.unwrap();
        let delivery = next(&mut stream).await;

        // Broker disappears after delivery; ack still goes through the claim
        queue.set_available(false);
        assert_eq!(persister.handle(delivery).await, PersistOutcome::Malformed);
        queue.set_available(true);

        assert_eq!(queue.depth(), 0);
        assert!(queue.dead_letters().is_empty());
        assert_eq!(persister.stats().snapshot().dead_lettered, 0);
    }

    #[tokio::test]
    async fn test_transient_failure_then_success_persists_once() {
        let queue = Arc::new(MemoryQueue::new("audit-events"));
        let store = Arc::new(FlakyStore::new(2));
        let persister = Persister::new(queue.clone(), store.clone(), config());

        queue
            .enqueue(serde_json::to_vec(&event()).unwrap())
            .await
            .unwrap();

        let mut stream = queue.subscribe().await.unwrap();
        assert_eq!(
            persister.handle(next(&mut stream).await).await,
            PersistOutcome::Retrying
        );
        assert_eq!(queue.depth(), 1);
        assert_eq!(
            persister.handle(next(&mut stream).await).await,
            PersistOutcome::Retrying
        );

        let third = next(&mut stream).await;
        assert_eq!(third.attempt(), 3);
        assert!(matches!(
            persister.handle(third).await,
            PersistOutcome::Persisted(_)
        ));

        assert_eq!(store.list().await.unwrap().len(), 1);
        assert_eq!(queue.depth(), 0);
        let stats = persister.stats().snapshot();
        assert_eq!(stats.store_failures, 2);
        assert_eq!(stats.persisted, 1);
    }

    #[tokio::test]
    async fn test_retry_ceiling_dead_letters() {
        let queue = Arc::new(MemoryQueue::new("audit-events"));
        let store = Arc::new(FlakyStore::new(usize::MAX));
        let persister = Persister::new(queue.clone(), store, config());

        queue
            .enqueue(serde_json::to_vec(&event()).unwrap())
            .await
            .unwrap();

        let mut stream = queue.subscribe().await.unwrap();
        for _ in 0..2 {
            assert_eq!(
                persister.handle(next(&mut stream).await).await,
                PersistOutcome::Retrying
            );
        }
        assert_eq!(
            persister.handle(next(&mut stream).await).await,
            PersistOutcome::DeadLettered
        );

        assert_eq!(queue.depth(), 0);
        let letters = queue.dead_letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].reason, DeadLetterReason::RetriesExhausted);
        assert_eq!(letters[0].attempt, 3);
    }

    #[tokio::test]
    async fn test_unbounded_retries_never_dead_letter() {
        let queue = Arc::new(MemoryQueue::new("audit-events"));
        let store = Arc::new(FlakyStore::new(usize::MAX));
        let mut config = config();
        config.max_deliveries = 0;
        let persister = Persister::new(queue.clone(), store, config);

        queue
            .enqueue(serde_json::to_vec(&event()).unwrap())
            .await
            .unwrap();

        let mut stream = queue.subscribe().await.unwrap();
        for _ in 0..5 {
            assert_eq!(
                persister.handle(next(&mut stream).await).await,
                PersistOutcome::Retrying
            );
        }
        assert_eq!(queue.depth(), 1);
        assert!(queue.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn test_ceiling_kept_when_dead_letter_fails() {
        let queue = Arc::new(MemoryQueue::new("audit-events"));
        let store = Arc::new(FlakyStore::new(usize::MAX));
        let mut config = config();
        config.max_deliveries = 1;
        let persister = Persister::new(queue.clone(), store, config);

        queue
            .enqueue(serde_json::to_vec(&event()).unwrap())
            .await
            .unwrap();

        let mut stream = queue.subscribe().await.unwrap();
        let delivery = next(&mut stream).await;
        queue.set_available(false);
        assert_eq!(persister.handle(delivery).await, PersistOutcome::Retrying);
        queue.set_available(true);

        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test]
    async fn test_insert_timeout_counts_as_store_failure() {
        let queue = Arc::new(MemoryQueue::new("audit-events"));
        let mut config = config();
        config.insert_timeout_ms = 20;
        let persister = Persister::new(queue.clone(), Arc::new(StalledStore), config);

        queue
            .enqueue(serde_json::to_vec(&event()).unwrap())
            .await
            .unwrap();

        let mut stream = queue.subscribe().await.unwrap();
        assert_eq!(
            persister.handle(next(&mut stream).await).await,
            PersistOutcome::Retrying
        );
        assert_eq!(queue.depth(), 1);
        assert_eq!(persister.stats().snapshot().store_failures, 1);
    }

    #[tokio::test]
    async fn test_run_drains_queue_and_stops_on_cancel() {
        let queue = Arc::new(MemoryQueue::new("audit-events"));
        let store = Arc::new(MemoryEventStore::new());
        let persister = Persister::new(queue.clone(), store.clone(), config());
        let stats = persister.stats();

        for _ in 0..5 {
            queue
                .enqueue(serde_json::to_vec(&event()).unwrap())
                .await
                .unwrap();
        }

        let shutdown = CancellationToken::new();
        let handle = persister.spawn(shutdown.clone());

        tokio::time::timeout(Duration::from_secs(2), async {
            while stats.snapshot().persisted < 5 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(store.len(), 5);
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn test_run_resubscribes_after_outage() {
        let queue = Arc::new(MemoryQueue::new("audit-events"));
        let store = Arc::new(MemoryEventStore::new());
        let persister = Persister::new(queue.clone(), store.clone(), config());
        let stats = persister.stats();

        queue.set_available(false);
        let shutdown = CancellationToken::new();
        let handle = persister.spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.set_available(true);
        queue
            .enqueue(serde_json::to_vec(&event()).unwrap())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while stats.snapshot().persisted < 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_error_kinds_are_retriable() {
        assert!(StoreError::timeout(StoreOperation::Insert, "slow").is_retriable());
        assert_eq!(
            StoreError::connection_failed("down").kind,
            StoreErrorKind::ConnectionFailed
        );
    }
}

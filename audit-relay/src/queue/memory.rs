//! In-process delivery queue
//!
//! Same contract as the broker-backed queue, minus durability across process
//! restarts. Messages claimed by a subscription stay claimed until they are
//! acked or nacked, or until the subscription stream is dropped, at which
//! point they go back to the head of the queue in their original order.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

use super::{
    Acknowledger, DeadLetter, Delivery, DeliveryQueue, DeliveryStream, EnqueueReceipt,
};
use crate::error::QueueError;

#[derive(Debug, Clone)]
struct Entry {
    sequence: u64,
    payload: Vec<u8>,
    deliveries: u64,
}

/// Internal state protected by a `std::sync::Mutex`
///
/// The mutex is never held across `.await` points.
#[derive(Debug)]
struct QueueState {
    next_sequence: u64,
    next_subscription: u64,
    pending: VecDeque<Entry>,
    /// sequence -> (subscription id, entry)
    claimed: HashMap<u64, (u64, Entry)>,
    /// Nacked with a delay, waiting to be requeued
    delayed: usize,
    dead_letters: Vec<DeadLetter>,
    available: bool,
}

struct Shared {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn requeue(&self, entry: Entry) {
        self.lock().pending.push_back(entry);
        self.notify.notify_one();
    }
}

/// In-memory [`DeliveryQueue`]
#[derive(Clone)]
pub struct MemoryQueue {
    shared: Arc<Shared>,
}

impl MemoryQueue {
    /// Create an empty queue
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                state: Mutex::new(QueueState {
                    next_sequence: 0,
                    next_subscription: 0,
                    pending: VecDeque::new(),
                    claimed: HashMap::new(),
                    delayed: 0,
                    dead_letters: Vec::new(),
                    available: true,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Simulate the broker going away (or coming back)
    pub fn set_available(&self, available: bool) {
        self.shared.lock().available = available;
    }

    /// Messages not yet acknowledged: pending, claimed, or waiting on a nack delay
    pub fn depth(&self) -> usize {
        let state = self.shared.lock();
        state.pending.len() + state.claimed.len() + state.delayed
    }

    /// Messages claimed by a subscription and not yet acked or nacked
    pub fn in_flight(&self) -> usize {
        self.shared.lock().claimed.len()
    }

    /// Everything routed to the dead-letter channel so far
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.shared.lock().dead_letters.clone()
    }

    fn ensure_available(&self, state: &QueueState) -> Result<(), QueueError> {
        if state.available {
            Ok(())
        } else {
            Err(QueueError::Unavailable(format!(
                "memory queue '{}' is unavailable",
                self.shared.name
            )))
        }
    }
}

#[async_trait]
impl DeliveryQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.shared.name
    }

    async fn enqueue(&self, payload: Vec<u8>) -> Result<EnqueueReceipt, QueueError> {
        let sequence = {
            let mut state = self.shared.lock();
            self.ensure_available(&state)?;
            state.next_sequence += 1;
            let sequence = state.next_sequence;
            state.pending.push_back(Entry {
                sequence,
                payload,
                deliveries: 0,
            });
            sequence
        };
        self.shared.notify.notify_one();

        Ok(EnqueueReceipt {
            queue: self.shared.name.clone(),
            sequence,
        })
    }

    async fn subscribe(&self) -> Result<DeliveryStream, QueueError> {
        let id = {
            let mut state = self.shared.lock();
            self.ensure_available(&state)?;
            state.next_subscription += 1;
            state.next_subscription
        };

        let subscription = Subscription {
            id,
            shared: self.shared.clone(),
        };

        let stream = futures::stream::unfold(subscription, |subscription| async move {
            let delivery = subscription.next_delivery().await;
            Some((Ok(delivery), subscription))
        });

        Ok(stream.boxed())
    }

    async fn dead_letter(&self, letter: DeadLetter) -> Result<(), QueueError> {
        let mut state = self.shared.lock();
        self.ensure_available(&state)?;
        state.dead_letters.push(letter);
        Ok(())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let state = self.shared.lock();
        self.ensure_available(&state)
    }
}

/// One consumer session; releases its claims when dropped
struct Subscription {
    id: u64,
    shared: Arc<Shared>,
}

impl Subscription {
    fn claim(&self) -> Option<Entry> {
        let mut state = self.shared.lock();
        let mut entry = state.pending.pop_front()?;
        entry.deliveries += 1;
        state
            .claimed
            .insert(entry.sequence, (self.id, entry.clone()));
        Some(entry)
    }

    async fn next_delivery(&self) -> Delivery {
        loop {
            let notified = self.shared.notify.notified();
            if let Some(entry) = self.claim() {
                let acker = MemoryAcker {
                    shared: self.shared.clone(),
                    sequence: entry.sequence,
                };
                return Delivery::new(
                    entry.payload,
                    entry.sequence,
                    entry.deliveries,
                    Box::new(acker),
                );
            }
            notified.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let released = {
            let mut state = self.shared.lock();
            let mut released: Vec<Entry> = Vec::new();
            state.claimed.retain(|_, (owner, entry)| {
                if *owner == self.id {
                    released.push(entry.clone());
                    false
                } else {
                    true
                }
            });

            released.sort_by_key(|entry| entry.sequence);
            for entry in released.iter().rev() {
                state.pending.push_front(entry.clone());
            }
            released.len()
        };

        if released > 0 {
            tracing::debug!(
                subscription = self.id,
                released,
                "Subscription ended, unacknowledged messages returned to queue"
            );
            self.shared.notify.notify_one();
        }
    }
}

struct MemoryAcker {
    shared: Arc<Shared>,
    sequence: u64,
}

impl MemoryAcker {
    fn unclaim(&self) -> Result<Entry, QueueError> {
        self.shared
            .lock()
            .claimed
            .remove(&self.sequence)
            .map(|(_, entry)| entry)
            .ok_or_else(|| {
                QueueError::Ack(format!("message {} is no longer claimed", self.sequence))
            })
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<(), QueueError> {
        self.unclaim().map(|_| ())
    }

    async fn nack(&self, delay: Option<Duration>) -> Result<(), QueueError> {
        let entry = self.unclaim()?;

        match delay {
            Some(delay) if !delay.is_zero() => {
                self.shared.lock().delayed += 1;
                let shared = self.shared.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    shared.lock().delayed -= 1;
                    shared.requeue(entry);
                });
            }
            _ => self.shared.requeue(entry),
        }

        Ok(())
    }

    async fn in_progress(&self) -> Result<(), QueueError> {
        if self.shared.lock().claimed.contains_key(&self.sequence) {
            Ok(())
        } else {
            Err(QueueError::Ack(format!(
                "message {} is no longer claimed",
                self.sequence
            )))
        }
    }
}

//! NATS JetStream delivery queue
//!
//! The primary queue is a work-queue stream on file storage, consumed through
//! one durable pull consumer with explicit acknowledgement. Redelivery after a
//! crash is the server's job: anything not acked within `ack_wait` is handed
//! out again. Dead letters go to a separate limits-retention stream with the
//! drop reason carried in message headers.

use async_nats::jetstream::{self, consumer, stream, AckKind};
use async_nats::{Client, HeaderMap};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;

use super::{
    Acknowledger, DeadLetter, Delivery, DeliveryQueue, DeliveryStream, EnqueueReceipt,
};
use crate::config::{NatsConfig, QueueConfig};
use crate::error::QueueError;

const HEADER_CONTENT_TYPE: &str = "Content-Type";
const CONTENT_TYPE_JSON: &str = "application/json";

/// Header naming why a message was dead-lettered
pub const HEADER_DEAD_LETTER_REASON: &str = "Audit-Dead-Letter-Reason";
/// Header carrying the last error seen for a dead-lettered message
pub const HEADER_DEAD_LETTER_DETAIL: &str = "Audit-Dead-Letter-Detail";
/// Header carrying the stream sequence of the original message
pub const HEADER_DELIVERY_KEY: &str = "Audit-Delivery-Key";
/// Header carrying the delivery attempt at which the message was dropped
pub const HEADER_DELIVERY_ATTEMPT: &str = "Audit-Delivery-Attempt";
/// Header naming the queue the message was taken from
pub const HEADER_SOURCE_QUEUE: &str = "Audit-Source-Queue";

/// Connect to NATS with retries
///
/// Uses exponential backoff between attempts.
pub async fn connect_client(config: &NatsConfig) -> Result<Client, QueueError> {
    let mut attempt = 0;
    let base_delay = Duration::from_secs(config.retry_delay_secs);

    loop {
        match try_connect(config).await {
            Ok(client) => {
                if attempt > 0 {
                    tracing::info!(
                        "NATS connection established after {} attempt(s)",
                        attempt + 1
                    );
                } else {
                    tracing::info!("NATS client connected to {}", config.url);
                }
                return Ok(client);
            }
            Err(e) => {
                attempt += 1;

                if attempt > config.max_retries {
                    tracing::error!(
                        "Failed to connect to NATS after {} attempts: {}",
                        config.max_retries + 1,
                        e
                    );
                    return Err(e);
                }

                let delay = base_delay * 2_u32.pow(attempt.saturating_sub(1));

                tracing::warn!(
                    "NATS connection attempt {} failed: {}. Retrying in {:?}...",
                    attempt,
                    e,
                    delay
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn try_connect(config: &NatsConfig) -> Result<Client, QueueError> {
    let mut opts = async_nats::ConnectOptions::new();

    if let Some(name) = &config.name {
        opts = opts.name(name);
    }

    opts = opts.max_reconnects(Some(config.max_reconnects));

    opts.connect(&config.url).await.map_err(|e| {
        QueueError::Unavailable(format!(
            "Failed to connect to NATS server at '{}' (client name: {}): {}",
            config.url,
            config.name.as_deref().unwrap_or("<none>"),
            e
        ))
    })
}

/// [`DeliveryQueue`] backed by a JetStream work-queue stream
#[derive(Clone)]
pub struct JetStreamQueue {
    client: Client,
    context: jetstream::Context,
    consumer: consumer::Consumer<consumer::pull::Config>,
    name: String,
    dead_letter_name: String,
    pull_batch: usize,
}

impl JetStreamQueue {
    /// Declare the streams and the durable consumer, creating them if needed
    pub async fn connect(client: Client, config: &QueueConfig) -> Result<Self, QueueError> {
        let context = jetstream::new(client.clone());

        let primary = context
            .get_or_create_stream(stream::Config {
                name: config.name.clone(),
                subjects: vec![config.name.clone()],
                retention: stream::RetentionPolicy::WorkQueue,
                storage: stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| {
                QueueError::Unavailable(format!(
                    "failed to declare stream '{}': {}",
                    config.name, e
                ))
            })?;

        context
            .get_or_create_stream(stream::Config {
                name: config.dead_letter_name.clone(),
                subjects: vec![config.dead_letter_name.clone()],
                retention: stream::RetentionPolicy::Limits,
                storage: stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| {
                QueueError::Unavailable(format!(
                    "failed to declare dead-letter stream '{}': {}",
                    config.dead_letter_name, e
                ))
            })?;

        let durable = format!("{}-persister", config.name);
        let consumer = primary
            .get_or_create_consumer(
                &durable,
                consumer::pull::Config {
                    durable_name: Some(durable.clone()),
                    ack_policy: consumer::AckPolicy::Explicit,
                    ack_wait: config.ack_wait(),
                    max_deliver: -1,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| {
                QueueError::Subscribe(format!("failed to declare consumer '{}': {}", durable, e))
            })?;

        tracing::info!(
            queue = %config.name,
            dead_letter_queue = %config.dead_letter_name,
            consumer = %durable,
            "JetStream delivery queue ready"
        );

        Ok(Self {
            client,
            context,
            consumer,
            name: config.name.clone(),
            dead_letter_name: config.dead_letter_name.clone(),
            pull_batch: 1,
        })
    }

    /// Messages pulled from the server per request
    ///
    /// Every pulled message is claimed and its ack-wait timer runs while it
    /// sits in the client buffer, so this should match the consumer's
    /// concurrency.
    pub fn with_pull_batch(mut self, pull_batch: usize) -> Self {
        self.pull_batch = pull_batch.max(1);
        self
    }

    async fn publish(
        &self,
        subject: &str,
        headers: HeaderMap,
        payload: Vec<u8>,
    ) -> Result<u64, QueueError> {
        let publish_error = |e: &dyn std::fmt::Display| QueueError::Publish {
            subject: subject.to_string(),
            message: e.to_string(),
        };

        let ack = self
            .context
            .publish_with_headers(subject.to_string(), headers, payload.into())
            .await
            .map_err(|e| publish_error(&e))?
            .await
            .map_err(|e| publish_error(&e))?;

        Ok(ack.sequence)
    }
}

#[async_trait]
impl DeliveryQueue for JetStreamQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, payload: Vec<u8>) -> Result<EnqueueReceipt, QueueError> {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_CONTENT_TYPE, CONTENT_TYPE_JSON);

        let sequence = self.publish(&self.name, headers, payload).await?;

        Ok(EnqueueReceipt {
            queue: self.name.clone(),
            sequence,
        })
    }

    async fn subscribe(&self) -> Result<DeliveryStream, QueueError> {
        let messages = self
            .consumer
            .stream()
            .max_messages_per_batch(self.pull_batch)
            .messages()
            .await
            .map_err(|e| QueueError::Subscribe(e.to_string()))?;

        let stream = messages.map(|item| {
            let message = item.map_err(|e| QueueError::Subscribe(e.to_string()))?;
            let (key, attempt) = {
                let info = message.info().map_err(|e| {
                    QueueError::Subscribe(format!("invalid delivery metadata: {}", e))
                })?;
                delivery_position(info.stream_sequence, info.delivered)
            };
            let payload = message.payload.to_vec();

            Ok(Delivery::new(
                payload,
                key,
                attempt,
                Box::new(JetStreamAcker { message }),
            ))
        });

        Ok(stream.boxed())
    }

    async fn dead_letter(&self, letter: DeadLetter) -> Result<(), QueueError> {
        let headers = dead_letter_headers(&letter);
        self.publish(&self.dead_letter_name, headers, letter.payload)
            .await
            .map(|_| ())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        match self.client.connection_state() {
            async_nats::connection::State::Connected => Ok(()),
            state => Err(QueueError::Unavailable(format!(
                "NATS connection is {:?}",
                state
            ))),
        }
    }
}

struct JetStreamAcker {
    message: jetstream::Message,
}

#[async_trait]
impl Acknowledger for JetStreamAcker {
    async fn ack(&self) -> Result<(), QueueError> {
        self.message
            .ack()
            .await
            .map_err(|e| QueueError::Ack(e.to_string()))
    }

    async fn nack(&self, delay: Option<Duration>) -> Result<(), QueueError> {
        self.message
            .ack_with(AckKind::Nak(delay))
            .await
            .map_err(|e| QueueError::Ack(e.to_string()))
    }

    async fn in_progress(&self) -> Result<(), QueueError> {
        self.message
            .ack_with(AckKind::Progress)
            .await
            .map_err(|e| QueueError::Ack(e.to_string()))
    }
}

/// Delivery key and attempt from JetStream message metadata
///
/// The stream sequence is stable across redeliveries; the delivered count is
/// 1 on first delivery.
fn delivery_position(stream_sequence: u64, delivered: i64) -> (u64, u64) {
    (stream_sequence, delivered.max(1) as u64)
}

fn dead_letter_headers(letter: &DeadLetter) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(HEADER_CONTENT_TYPE, CONTENT_TYPE_JSON);
    headers.insert(HEADER_DEAD_LETTER_REASON, letter.reason.to_string().as_str());
    headers.insert(HEADER_DEAD_LETTER_DETAIL, letter.detail.as_str());
    headers.insert(HEADER_DELIVERY_KEY, letter.key.to_string().as_str());
    headers.insert(HEADER_DELIVERY_ATTEMPT, letter.attempt.to_string().as_str());
    headers.insert(HEADER_SOURCE_QUEUE, letter.queue.as_str());
    headers
}

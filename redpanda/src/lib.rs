//! Redpanda message queue transport for the user service.
//!
//! This crate provides [`RedpandaQueue`], an implementation of the
//! [`MessageQueue`] trait from `user-service-core` on top of rdkafka. Any
//! Kafka-compatible broker works: Redpanda, Apache Kafka, MSK.
//!
//! # Queue Mapping
//!
//! A named queue is a topic. Consumers sharing a consumer group split its
//! partitions, so each message is processed by one consumer of the group.
//! Messages are keyed by user id, which keeps all events for one user on one
//! partition and therefore in order.
//!
//! # Delivery Semantics
//!
//! **At-least-once** with manual offset commits:
//! - A partition hands out one delivery at a time and waits for its settlement
//! - `ack` commits the offset past the message
//! - `nack` (or dropping the delivery) seeks back so the message is fetched again
//! - If the process crashes before commit, the message is redelivered on restart
//!
//! The `redelivered` flag is only set for messages nacked by this process;
//! redeliveries after a restart are indistinguishable from first deliveries.
//!
//! # Durability
//!
//! The producer waits for all in-sync replicas (`acks=all`) with idempotence
//! enabled, so a publish resolves only once the message is persisted. The
//! message's durable marker is also carried as a `durable` header.
//!
//! # Example
//!
//! ```no_run
//! use user_service_core::queue::{MessageQueue, QueueMessage};
//! use user_service_redpanda::RedpandaQueue;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = RedpandaQueue::new("localhost:9092")?;
//! queue.declare_queue("task_queue").await?;
//!
//! queue
//!     .publish("task_queue", &QueueMessage::durable("user-1", b"{}".to_vec()))
//!     .await?;
//!
//! let mut deliveries = queue.subscribe("task_queue").await?;
//! while let Some(delivery) = deliveries.next().await {
//!     let delivery = delivery?;
//!     println!("{} bytes", delivery.payload().len());
//!     delivery.ack()?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::message::{Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use user_service_core::queue::{
    Acknowledger, Delivery, DeliveryStream, MessageQueue, QueueError, QueueMessage, Settlement,
};

/// Header carrying the message's durability marker.
pub const DURABLE_HEADER: &str = "durable";

/// Redpanda-backed [`MessageQueue`].
///
/// The producer is created once and shared: rdkafka producers are internally
/// synchronized and batch concurrent sends over one connection set.
///
/// # Example
///
/// ```no_run
/// use user_service_redpanda::RedpandaQueue;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = RedpandaQueue::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .consumer_group("user-service-consumer")
///     .partitions(6)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaQueue {
    /// Kafka producer for publishing messages
    producer: FutureProducer,
    /// Admin client for declaring topics
    admin: AdminClient<DefaultClientContext>,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Producer and admin timeout
    timeout: Duration,
    /// Consumer group ID
    consumer_group: String,
    /// Auto offset reset policy
    auto_offset_reset: String,
    /// Partitions for newly declared topics
    partitions: i32,
    /// Replication factor for newly declared topics
    replication: i32,
}

impl RedpandaQueue {
    /// Create a queue client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConnectionFailed`] if the clients cannot be created.
    pub fn new(brokers: &str) -> Result<Self, QueueError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the queue client.
    #[must_use]
    pub fn builder() -> RedpandaQueueBuilder {
        RedpandaQueueBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Get the consumer group used by subscriptions.
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }
}

/// Builder for configuring a [`RedpandaQueue`].
#[derive(Default)]
pub struct RedpandaQueueBuilder {
    brokers: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
    partitions: Option<i32>,
    replication: Option<i32>,
}

impl RedpandaQueueBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send and admin timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group ID for subscriptions.
    ///
    /// Instances sharing a group split the queue's work between them.
    ///
    /// Default: "user-service-consumer"
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set where a new consumer group starts reading: "earliest" or "latest".
    ///
    /// Default: "earliest", so messages published before the first
    /// subscription are still processed.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set the partition count used when declaring a topic.
    ///
    /// Default: 3
    #[must_use]
    pub const fn partitions(mut self, partitions: i32) -> Self {
        self.partitions = Some(partitions);
        self
    }

    /// Set the replication factor used when declaring a topic.
    ///
    /// Default: 1
    #[must_use]
    pub const fn replication(mut self, replication: i32) -> Self {
        self.replication = Some(replication);
        self
    }

    /// Build the [`RedpandaQueue`].
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConnectionFailed`] if:
    /// - Brokers not set
    /// - Cannot create producer or admin client
    pub fn build(self) -> Result<RedpandaQueue, QueueError> {
        let brokers = self
            .brokers
            .ok_or_else(|| QueueError::ConnectionFailed("Brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("compression.type", compression)
            .create()
            .map_err(|e| QueueError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .create()
            .map_err(|e| {
                QueueError::ConnectionFailed(format!("Failed to create admin client: {e}"))
            })?;

        let queue = RedpandaQueue {
            producer,
            admin,
            brokers,
            timeout,
            consumer_group: self
                .consumer_group
                .unwrap_or_else(|| "user-service-consumer".to_string()),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
            partitions: self.partitions.unwrap_or(3),
            replication: self.replication.unwrap_or(1),
        };

        tracing::info!(
            brokers = %queue.brokers,
            compression,
            consumer_group = %queue.consumer_group,
            auto_offset_reset = %queue.auto_offset_reset,
            "RedpandaQueue created successfully"
        );

        Ok(queue)
    }
}

/// Settles one delivery by reporting back to the forwarding task.
struct KafkaAcker {
    tx: oneshot::Sender<Settlement>,
}

impl Acknowledger for KafkaAcker {
    fn settle(self: Box<Self>, settlement: Settlement) -> Result<(), QueueError> {
        self.tx
            .send(settlement)
            .map_err(|_| QueueError::AckFailed("Consumer task has stopped".to_string()))
    }
}

/// Commit the offset past `offset`, or seek back to it for redelivery.
fn apply_settlement(
    consumer: &StreamConsumer,
    topic: &str,
    partition: i32,
    offset: i64,
    settlement: Settlement,
) -> Result<(), String> {
    match settlement {
        Settlement::Ack => {
            let mut offsets = TopicPartitionList::new();
            offsets
                .add_partition_offset(topic, partition, Offset::Offset(offset + 1))
                .map_err(|e| e.to_string())?;
            consumer
                .commit(&offsets, CommitMode::Async)
                .map_err(|e| e.to_string())
        }
        Settlement::Nack => consumer
            .seek(topic, partition, Offset::Offset(offset), Duration::from_secs(5))
            .map_err(|e| e.to_string()),
    }
}

impl MessageQueue for RedpandaQueue {
    fn declare_queue(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        let queue = queue.to_string();

        Box::pin(async move {
            let topic = NewTopic::new(&queue, self.partitions, TopicReplication::Fixed(self.replication));
            let options = AdminOptions::new().operation_timeout(Some(self.timeout));

            let results = self
                .admin
                .create_topics(&[topic], &options)
                .await
                .map_err(|e| {
                    QueueError::TransportError(format!("Declare of queue '{queue}' failed: {e}"))
                })?;

            for result in results {
                match result {
                    Ok(_) => tracing::info!(queue = %queue, "Queue declared"),
                    Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {
                        tracing::debug!(queue = %queue, "Queue already exists");
                    }
                    Err((_, code)) => {
                        return Err(QueueError::DeclareFailed {
                            queue,
                            reason: code.to_string(),
                        });
                    }
                }
            }
            Ok(())
        })
    }

    fn publish(
        &self,
        queue: &str,
        message: &QueueMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        let queue = queue.to_string();
        let message = message.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let headers = OwnedHeaders::new().insert(Header {
                key: DURABLE_HEADER,
                value: Some(if message.durable { "true" } else { "false" }),
            });

            let record = FutureRecord::to(&queue)
                .payload(&message.payload)
                .key(&message.key)
                .headers(headers);

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        queue = %queue,
                        partition,
                        offset,
                        key = %message.key,
                        "Message published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        queue = %queue,
                        error = %kafka_error,
                        "Failed to publish message"
                    );
                    Err(QueueError::PublishFailed {
                        queue,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    #[allow(clippy::too_many_lines)] // One delivery in flight, settled before the next fetch
    fn subscribe(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, QueueError>> + Send + '_>> {
        let queue = queue.to_string();
        let brokers = self.brokers.clone();
        let consumer_group = self.consumer_group.clone();
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| QueueError::SubscriptionFailed {
                    queue: queue.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            consumer
                .subscribe(&[queue.as_str()])
                .map_err(|e| QueueError::SubscriptionFailed {
                    queue: queue.clone(),
                    reason: format!("Failed to subscribe: {e}"),
                })?;

            tracing::info!(
                queue = %queue,
                consumer_group = %consumer_group,
                auto_offset_reset = %auto_offset_reset,
                "Subscribed to queue"
            );

            let (tx, rx) = mpsc::channel(1);

            // Owns the consumer. Hands out one delivery at a time and applies
            // its settlement before fetching the next message.
            tokio::spawn(async move {
                let mut nacked: HashSet<(i32, i64)> = HashSet::new();

                loop {
                    let received = tokio::select! {
                        () = tx.closed() => break,
                        received = consumer.recv() => received,
                    };

                    let (topic, partition, offset, message) = match received {
                        Ok(borrowed) => {
                            let durable = borrowed.headers().is_none_or(|headers| {
                                headers
                                    .iter()
                                    .find(|h| h.key == DURABLE_HEADER)
                                    .is_none_or(|h| h.value != Some(b"false".as_slice()))
                            });
                            let message = QueueMessage {
                                key: borrowed
                                    .key()
                                    .map(|k| String::from_utf8_lossy(k).into_owned())
                                    .unwrap_or_default(),
                                payload: borrowed.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                                durable,
                            };
                            (
                                borrowed.topic().to_string(),
                                borrowed.partition(),
                                borrowed.offset(),
                                message,
                            )
                        }
                        Err(e) => {
                            let err = QueueError::TransportError(format!(
                                "Failed to receive message: {e}"
                            ));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                            continue;
                        }
                    };

                    let redelivered = nacked.remove(&(partition, offset));
                    let (settle_tx, settle_rx) = oneshot::channel();
                    let delivery = Delivery::new(
                        message,
                        redelivered,
                        Box::new(KafkaAcker { tx: settle_tx }),
                    );

                    if tx.send(Ok(delivery)).await.is_err() {
                        tracing::debug!("Delivery receiver dropped, exiting consumer task");
                        break;
                    }

                    // A dropped acker counts as a nack.
                    let settlement = settle_rx.await.unwrap_or(Settlement::Nack);
                    if settlement == Settlement::Nack {
                        nacked.insert((partition, offset));
                    }

                    if let Err(e) =
                        apply_settlement(&consumer, &topic, partition, offset, settlement)
                    {
                        tracing::warn!(
                            topic = %topic,
                            partition,
                            offset,
                            settlement = ?settlement,
                            error = %e,
                            "Failed to apply settlement (message may be redelivered)"
                        );
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_queue_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaQueue>();
        assert_sync::<RedpandaQueue>();
    }

    #[test]
    fn build_without_brokers_fails() {
        let result = RedpandaQueue::builder().build();
        assert!(matches!(result, Err(QueueError::ConnectionFailed(_))));
    }

    #[test]
    fn acker_reports_settlement() {
        let (tx, rx) = oneshot::channel();
        let acker: Box<dyn Acknowledger> = Box::new(KafkaAcker { tx });

        assert!(acker.settle(Settlement::Ack).is_ok());
        assert!(matches!(rx.blocking_recv(), Ok(Settlement::Ack)));
    }

    #[test]
    fn acker_fails_when_consumer_task_is_gone() {
        let (tx, rx) = oneshot::channel();
        drop(rx);
        let acker: Box<dyn Acknowledger> = Box::new(KafkaAcker { tx });

        assert!(matches!(
            acker.settle(Settlement::Nack),
            Err(QueueError::AckFailed(_))
        ));
    }
}

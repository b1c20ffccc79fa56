//! Message queue abstraction with explicit acknowledgment.
//!
//! Producers publish durable [`QueueMessage`]s to a named queue. Consumers
//! subscribe and receive a stream of [`Delivery`] values, each of which must be
//! settled: [`Delivery::ack`] removes the message from the queue,
//! [`Delivery::nack`] returns it for redelivery.
//!
//! # Delivery Semantics
//!
//! - **At-least-once**: a message is redelivered until it is acknowledged
//! - **Ack after work**: consumers acknowledge only after processing succeeds
//! - **Drop means nack**: a delivery dropped without a decision is returned
//!   to the queue, so an abandoned handler never loses a message
//! - **No global order**: only messages sharing a key keep their relative order
//!
//! ```text
//! publish ──► [ queue ] ──► Delivery ──┬─ ack()  ──► removed
//!                 ▲                    └─ nack() ──┐
//!                 └────────── redelivered ◄────────┘
//! ```

use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during queue operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The broker refused to create the queue
    #[error("Declare failed for queue '{queue}': {reason}")]
    DeclareFailed {
        /// The queue that failed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to publish a message
    #[error("Publish failed for queue '{queue}': {reason}")]
    PublishFailed {
        /// The queue that failed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to a queue
    #[error("Subscription failed for queue '{queue}': {reason}")]
    SubscriptionFailed {
        /// The queue that failed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to record an ack or nack
    #[error("Acknowledgment failed: {0}")]
    AckFailed(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

impl QueueError {
    /// Whether retrying the same operation may succeed.
    ///
    /// Connection, transport, publish and subscribe failures are transient. A
    /// refused declare (bad configuration, missing authorization) and a failed
    /// acknowledgment are not.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionFailed(_)
            | Self::PublishFailed { .. }
            | Self::SubscriptionFailed { .. }
            | Self::TransportError(_) => true,
            Self::DeclareFailed { .. } | Self::AckFailed(_) => false,
        }
    }
}

/// A message as handed to the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueMessage {
    /// Partition key; messages sharing a key keep their relative order
    pub key: String,
    /// Encoded body
    pub payload: Vec<u8>,
    /// Whether the broker must persist the message before confirming
    pub durable: bool,
}

impl QueueMessage {
    /// A message the broker must persist.
    #[must_use]
    pub fn durable(key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            payload,
            durable: true,
        }
    }
}

/// Outcome of processing a delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Settlement {
    /// Processed; remove from the queue
    Ack,
    /// Not processed; redeliver
    Nack,
}

/// Transport-specific half of a [`Delivery`] that records its settlement.
///
/// Settling is synchronous so that a dropped delivery can still be returned
/// to the queue from `Drop`.
pub trait Acknowledger: Send {
    /// Record the outcome for this delivery. Called at most once.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::AckFailed`] if the transport can no longer
    /// accept the decision (for example, its consumer has shut down).
    fn settle(self: Box<Self>, settlement: Settlement) -> Result<(), QueueError>;
}

/// A message received from a queue, awaiting settlement.
pub struct Delivery {
    message: QueueMessage,
    redelivered: bool,
    acker: Option<Box<dyn Acknowledger>>,
}

impl Delivery {
    /// Pair a received message with the acknowledger that settles it.
    #[must_use]
    pub fn new(message: QueueMessage, redelivered: bool, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            message,
            redelivered,
            acker: Some(acker),
        }
    }

    /// The received message.
    #[must_use]
    pub const fn message(&self) -> &QueueMessage {
        &self.message
    }

    /// The message body.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    /// Whether this message was delivered before and not acknowledged.
    #[must_use]
    pub const fn is_redelivered(&self) -> bool {
        self.redelivered
    }

    /// Acknowledge: the message will not be delivered again.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::AckFailed`] if the transport rejects the ack.
    pub fn ack(mut self) -> Result<(), QueueError> {
        self.settle(Settlement::Ack)
    }

    /// Reject: the message goes back to the queue for redelivery.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::AckFailed`] if the transport rejects the nack.
    pub fn nack(mut self) -> Result<(), QueueError> {
        self.settle(Settlement::Nack)
    }

    fn settle(&mut self, settlement: Settlement) -> Result<(), QueueError> {
        match self.acker.take() {
            Some(acker) => acker.settle(settlement),
            None => Ok(()),
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if let Err(e) = self.settle(Settlement::Nack) {
            tracing::warn!(error = %e, "Failed to return abandoned delivery to queue");
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("redelivered", &self.redelivered)
            .field("settled", &self.acker.is_none())
            .finish()
    }
}

/// Stream of deliveries from a subscription.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, QueueError>> + Send>>;

/// Trait for message queue transports.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` so the transport can be shared as
/// `Arc<dyn MessageQueue>` between the publisher and the consumer.
pub trait MessageQueue: Send + Sync {
    /// Ensure `queue` exists and is durable. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::DeclareFailed`] if the queue cannot be created.
    fn declare_queue(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>>;

    /// Publish a message to `queue`.
    ///
    /// Resolves once the broker has accepted the message; for durable
    /// messages, once it has been persisted.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::PublishFailed`] if the broker rejects the message
    /// or cannot be reached.
    fn publish(
        &self,
        queue: &str,
        message: &QueueMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>>;

    /// Subscribe to `queue` and receive its deliveries.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::SubscriptionFailed`] if the subscription cannot
    /// be established.
    fn subscribe(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, QueueError>> + Send + '_>>;
}

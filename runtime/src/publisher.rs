//! Event publisher: hands committed user events to the queue transport.
//!
//! The publisher owns the queue name and the transport. It declares the queue
//! once, lazily, before the first publish, and retries transient transport
//! failures a bounded number of times. The whole publish, declare and retries
//! included, is bounded by a deadline so a broker that stops answering cannot
//! hold a request open. A failure that survives the retries is returned to the
//! caller, who decides whether it matters; the
//! [`UserService`](crate::service::UserService) only logs it.

use crate::metrics::PublishMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::OnceCell;
use user_service_core::event::{EncodeError, UserEvent};
use user_service_core::queue::{MessageQueue, QueueError};

/// Why an event was not published.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The event could not be serialized
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// The transport rejected the declare or publish after retries
    #[error(transparent)]
    Transport(#[from] QueueError),

    /// The declare and publish did not finish before the deadline
    #[error("Publish did not complete within {0:?}")]
    TimedOut(Duration),
}

/// Publishes [`UserEvent`]s as durable messages to one named queue.
pub struct EventPublisher {
    queue: Arc<dyn MessageQueue>,
    queue_name: String,
    retry: RetryPolicy,
    publish_timeout: Duration,
    declared: OnceCell<()>,
}

impl EventPublisher {
    /// Create a publisher for `queue_name`.
    ///
    /// Default retry policy: 2 retries starting at 50ms, capped at 1s. Default
    /// deadline for one publish: 5s.
    #[must_use]
    pub fn new(queue: Arc<dyn MessageQueue>, queue_name: impl Into<String>) -> Self {
        Self {
            queue,
            queue_name: queue_name.into(),
            retry: RetryPolicy::builder()
                .max_retries(2)
                .initial_delay(Duration::from_millis(50))
                .max_delay(Duration::from_secs(1))
                .build(),
            publish_timeout: Duration::from_secs(5),
            declared: OnceCell::new(),
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the deadline for one [`publish`](Self::publish), declare and
    /// retries included.
    #[must_use]
    pub const fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Name of the queue events are published to.
    #[must_use]
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Declare the queue if this publisher has not done so yet.
    ///
    /// A failed declare is retried on the next call. Within one call only
    /// transient failures are retried; a refused declare returns at once.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the declare is refused or still fails after
    /// retries.
    pub async fn ensure_declared(&self) -> Result<(), QueueError> {
        self.declared
            .get_or_try_init(|| async {
                retry_with_predicate(
                    &self.retry,
                    || self.queue.declare_queue(&self.queue_name),
                    QueueError::is_transient,
                )
                .await
            })
            .await
            .map(|_| ())
    }

    /// Publish `event` as a durable message.
    ///
    /// # Errors
    ///
    /// - [`PublishError::Encode`] if the event cannot be serialized
    /// - [`PublishError::Transport`] if the queue cannot be declared or the
    ///   message is rejected after retries
    /// - [`PublishError::TimedOut`] if the deadline elapses first
    pub async fn publish(&self, event: &UserEvent) -> Result<(), PublishError> {
        let started = Instant::now();
        let result = tokio::time::timeout(self.publish_timeout, self.try_publish(event))
            .await
            .unwrap_or(Err(PublishError::TimedOut(self.publish_timeout)));

        match &result {
            Ok(()) => {
                PublishMetrics::record_published(event.action, started.elapsed());
                tracing::debug!(
                    queue = %self.queue_name,
                    user_id = %event.id,
                    action = %event.action,
                    "Event published"
                );
            }
            Err(_) => PublishMetrics::record_failure(event.action),
        }
        result
    }

    async fn try_publish(&self, event: &UserEvent) -> Result<(), PublishError> {
        self.ensure_declared().await?;
        let message = event.to_message()?;
        retry_with_predicate(
            &self.retry,
            || self.queue.publish(&self.queue_name, &message),
            QueueError::is_transient,
        )
        .await?;
        Ok(())
    }
}

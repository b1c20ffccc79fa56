//! Queue consumer with ack-after-success, reconnection and graceful drain.
//!
//! `EventConsumer` subscribes to the user event queue and feeds each delivery
//! through an [`EventHandler`]. It owns all the infrastructure concerns:
//!
//! ```text
//! loop {
//!     subscribe (backoff on failure)
//!     for each delivery:
//!         decode ── DecodeError ──► log error, ack, drop
//!         handle ── Ok ───────────► ack
//!                └─ Err ──────────► nack, back off (redelivered later)
//!     stream ended ──► resubscribe
//! }
//! ```
//!
//! A single failure never stops the loop. Only the shutdown signal does.
//! Consecutive handler failures are paced by an exponential backoff, so a
//! handler whose dependency is down does not spin on the same redelivery.
//!
//! # Graceful Shutdown
//!
//! When the shutdown signal arrives the consumer stops taking deliveries. If a
//! handler is mid-flight it gets the drain window to finish; its delivery is
//! then settled normally. If the window elapses the delivery is abandoned
//! unacknowledged and will be redelivered.
//!
//! # Example
//!
//! ```rust,ignore
//! let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
//! let consumer = EventConsumer::new(queue, "task_queue", Arc::new(LoggingHandler), shutdown_rx)
//!     .with_drain_timeout(Duration::from_secs(10));
//! let handle = consumer.spawn();
//!
//! // Later
//! shutdown_tx.send(())?;
//! handle.await?;
//! ```

use crate::handler::{EventHandler, HandlerError};
use crate::metrics::ConsumerMetrics;
use crate::retry::RetryPolicy;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use user_service_core::event::UserEvent;
use user_service_core::queue::{Delivery, DeliveryStream, MessageQueue};

/// Whether the loop should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Shutdown,
}

/// Long-running consumer of the user event queue.
///
/// `EventConsumer` is `Send` so it can be moved into a tokio task via
/// [`spawn`](Self::spawn).
pub struct EventConsumer {
    /// Consumer name (for logging)
    name: String,

    /// Queue to consume from
    queue_name: String,

    /// Transport
    queue: Arc<dyn MessageQueue>,

    /// Handler for decoded events
    handler: Arc<dyn EventHandler>,

    /// Shutdown signal receiver
    shutdown: broadcast::Receiver<()>,

    /// Time an in-flight handler gets after shutdown (default: 10 seconds)
    drain_timeout: Duration,

    /// Backoff between re-subscription attempts
    reconnect: RetryPolicy,

    /// Backoff after a handler failure, before the next delivery
    handler_backoff: RetryPolicy,

    /// Handler failures since the last success
    handler_failures: usize,
}

impl EventConsumer {
    /// Create a new consumer.
    ///
    /// Defaults: name `"user-events"`, 10s drain window, reconnect backoff
    /// from 500ms up to 30s with jitter, handler-failure backoff from 100ms
    /// up to 10s with jitter.
    #[must_use]
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        queue_name: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: "user-events".to_string(),
            queue_name: queue_name.into(),
            queue,
            handler,
            shutdown,
            drain_timeout: Duration::from_secs(10),
            reconnect: RetryPolicy::builder()
                .initial_delay(Duration::from_millis(500))
                .max_delay(Duration::from_secs(30))
                .jitter(true)
                .build(),
            handler_backoff: RetryPolicy::builder()
                .initial_delay(Duration::from_millis(100))
                .max_delay(Duration::from_secs(10))
                .jitter(true)
                .build(),
            handler_failures: 0,
        }
    }

    /// Set the consumer name used in logs.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set how long an in-flight handler may run after shutdown.
    #[must_use]
    pub const fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Set the backoff between re-subscription attempts.
    #[must_use]
    pub fn with_reconnect_policy(mut self, policy: RetryPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Set the backoff applied after each consecutive handler failure.
    #[must_use]
    pub fn with_handler_backoff(mut self, policy: RetryPolicy) -> Self {
        self.handler_backoff = policy;
        self
    }

    /// Spawn the consumer as a background task.
    ///
    /// The task runs until the shutdown signal is received (or its sender is
    /// dropped).
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the subscribe-process-reconnect loop until shutdown.
    pub async fn run(&mut self) {
        info!(consumer = %self.name, queue = %self.queue_name, "Event consumer started");
        let mut failures = 0;

        loop {
            let subscribed = tokio::select! {
                _ = self.shutdown.recv() => break,
                subscribed = self.queue.subscribe(&self.queue_name) => subscribed,
            };

            match subscribed {
                Ok(mut stream) => {
                    failures = 0;
                    info!(consumer = %self.name, queue = %self.queue_name, "Subscribed to queue");

                    if self.process_stream(&mut stream).await == Flow::Shutdown {
                        break;
                    }
                    warn!(consumer = %self.name, "Delivery stream ended, resubscribing");
                }
                Err(e) => {
                    error!(consumer = %self.name, error = %e, "Failed to subscribe to queue");
                }
            }

            let delay = self.reconnect.delay_for_attempt(failures);
            failures += 1;
            debug!(consumer = %self.name, delay_ms = delay.as_millis(), "Waiting before resubscribing");

            tokio::select! {
                _ = self.shutdown.recv() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        info!(consumer = %self.name, "Event consumer stopped");
    }

    async fn process_stream(&mut self, stream: &mut DeliveryStream) -> Flow {
        loop {
            let next = tokio::select! {
                _ = self.shutdown.recv() => return Flow::Shutdown,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    if self.process_delivery(delivery).await == Flow::Shutdown {
                        return Flow::Shutdown;
                    }
                }
                Some(Err(e)) => {
                    error!(consumer = %self.name, error = %e, "Error receiving delivery");
                }
                None => return Flow::Continue,
            }
        }
    }

    async fn process_delivery(&mut self, delivery: Delivery) -> Flow {
        let event = match UserEvent::from_bytes(delivery.payload()) {
            Ok(event) => event,
            Err(e) => {
                error!(
                    consumer = %self.name,
                    error = %e,
                    payload = %String::from_utf8_lossy(delivery.payload()),
                    "Dropping undecodable message"
                );
                ConsumerMetrics::record_dropped();
                if let Err(e) = delivery.ack() {
                    warn!(consumer = %self.name, error = %e, "Failed to ack undecodable message");
                }
                return Flow::Continue;
            }
        };

        let handler = Arc::clone(&self.handler);
        let handling = handler.handle(&event);
        tokio::pin!(handling);

        let finished = tokio::select! {
            result = &mut handling => Some(result),
            _ = self.shutdown.recv() => None,
        };

        if let Some(result) = finished {
            self.settle(delivery, &event, result);
            if self.handler_failures > 0 {
                return self.back_off().await;
            }
            return Flow::Continue;
        }

        info!(
            consumer = %self.name,
            user_id = %event.id,
            drain_timeout_ms = self.drain_timeout.as_millis(),
            "Shutdown requested, draining in-flight message"
        );
        match tokio::time::timeout(self.drain_timeout, &mut handling).await {
            Ok(result) => self.settle(delivery, &event, result),
            Err(_) => {
                warn!(
                    consumer = %self.name,
                    user_id = %event.id,
                    "Drain window elapsed, leaving message unacknowledged"
                );
                drop(delivery);
                ConsumerMetrics::record_nack();
            }
        }
        Flow::Shutdown
    }

    /// Wait out the handler backoff, or stop early on shutdown.
    async fn back_off(&mut self) -> Flow {
        let delay = self
            .handler_backoff
            .delay_for_attempt(self.handler_failures.saturating_sub(1));
        debug!(
            consumer = %self.name,
            failures = self.handler_failures,
            delay_ms = delay.as_millis(),
            "Backing off after handler failure"
        );

        tokio::select! {
            _ = self.shutdown.recv() => Flow::Shutdown,
            () = tokio::time::sleep(delay) => Flow::Continue,
        }
    }

    fn settle(&mut self, delivery: Delivery, event: &UserEvent, result: Result<(), HandlerError>) {
        match result {
            Ok(()) => {
                self.handler_failures = 0;
                ConsumerMetrics::record_ack();
                if let Err(e) = delivery.ack() {
                    warn!(consumer = %self.name, error = %e, "Failed to ack message");
                }
                debug!(
                    consumer = %self.name,
                    user_id = %event.id,
                    action = %event.action,
                    "Event handled"
                );
            }
            Err(e) => {
                self.handler_failures += 1;
                ConsumerMetrics::record_nack();
                warn!(
                    consumer = %self.name,
                    failures = self.handler_failures,
                    user_id = %event.id,
                    action = %event.action,
                    error = %e,
                    "Handler failed, returning message for redelivery"
                );
                if let Err(e) = delivery.nack() {
                    warn!(consumer = %self.name, error = %e, "Failed to nack message");
                }
            }
        }
    }
}

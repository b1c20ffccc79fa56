//! In-memory message queue with acknowledgments and redelivery.
//!
//! [`InMemoryQueue`] behaves like a durable work queue:
//! - a delivery is removed only when acknowledged
//! - a nacked (or dropped) delivery goes back to the front of its queue,
//!   flagged as redelivered
//! - publishing to an undeclared queue fails, so tests catch a missing declare
//!
//! It also records everything that happened for assertions, and can be told
//! to fail publishes or subscriptions.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use user_service_core::event::UserEvent;
use user_service_core::queue::{
    Acknowledger, Delivery, DeliveryStream, MessageQueue, QueueError, QueueMessage, Settlement,
};

#[derive(Debug)]
struct Pending {
    message: QueueMessage,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    queues: HashMap<String, VecDeque<Pending>>,
    published: Vec<(String, QueueMessage)>,
    delivered: Vec<(QueueMessage, bool)>,
    acked: Vec<QueueMessage>,
    nacked: usize,
    declare_calls: usize,
    failing_publishes: usize,
    failing_subscribes: usize,
    offline: bool,
    refusing_declares: bool,
    stalled: bool,
    closed: bool,
}

/// In-memory [`MessageQueue`] for tests.
///
/// Clones share state.
///
/// # Example
///
/// ```
/// use user_service_testing::InMemoryQueue;
/// use user_service_core::queue::{MessageQueue, QueueMessage};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = InMemoryQueue::new();
/// queue.declare_queue("task_queue").await?;
/// queue.publish("task_queue", &QueueMessage::durable("k", b"hello".to_vec())).await?;
/// assert_eq!(queue.published("task_queue").len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryQueue {
    state: Arc<Mutex<QueueState>>,
    /// Signalled when a message becomes available
    available: Arc<Notify>,
    /// Signalled when a delivery is settled
    settled: Arc<Notify>,
}

impl InMemoryQueue {
    /// Create a queue with no declared queues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` publishes with [`QueueError::PublishFailed`].
    pub fn fail_next_publishes(&self, count: usize) {
        self.state.lock().unwrap().failing_publishes = count;
    }

    /// Fail the next `count` subscriptions with [`QueueError::SubscriptionFailed`].
    pub fn fail_next_subscribes(&self, count: usize) {
        self.state.lock().unwrap().failing_subscribes = count;
    }

    /// Simulate a broker outage: declares and publishes fail until reset.
    ///
    /// Failures are transient ([`QueueError::ConnectionFailed`] and
    /// [`QueueError::PublishFailed`]).
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    /// Make publishes hang until reset, like a broker that never answers.
    ///
    /// Publishes already hanging stay hung.
    pub fn stall_publishes(&self, stall: bool) {
        self.state.lock().unwrap().stalled = stall;
    }

    /// Refuse declares with [`QueueError::DeclareFailed`] until reset.
    pub fn refuse_declares(&self, refuse: bool) {
        self.state.lock().unwrap().refusing_declares = refuse;
    }

    /// Close the queue: every subscription stream ends once it is idle.
    ///
    /// Messages already pending stay pending.
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.available.notify_waiters();
    }

    /// Whether `queue` has been declared.
    #[must_use]
    pub fn is_declared(&self, queue: &str) -> bool {
        self.state.lock().unwrap().queues.contains_key(queue)
    }

    /// Number of `declare_queue` calls, successful or not.
    #[must_use]
    pub fn declare_calls(&self) -> usize {
        self.state.lock().unwrap().declare_calls
    }

    /// Every message successfully published to `queue`, in publish order.
    #[must_use]
    pub fn published(&self, queue: &str) -> Vec<QueueMessage> {
        self.state
            .lock()
            .unwrap()
            .published
            .iter()
            .filter(|(name, _)| name == queue)
            .map(|(_, message)| message.clone())
            .collect()
    }

    /// Published messages on `queue` decoded as user events.
    ///
    /// Messages that do not decode are skipped.
    #[must_use]
    pub fn published_events(&self, queue: &str) -> Vec<UserEvent> {
        self.published(queue)
            .iter()
            .filter_map(|message| UserEvent::from_bytes(&message.payload).ok())
            .collect()
    }

    /// Every delivery handed to a subscriber, with its redelivered flag.
    #[must_use]
    pub fn deliveries(&self) -> Vec<(QueueMessage, bool)> {
        self.state.lock().unwrap().delivered.clone()
    }

    /// Every acknowledged message, in ack order.
    #[must_use]
    pub fn acked(&self) -> Vec<QueueMessage> {
        self.state.lock().unwrap().acked.clone()
    }

    /// Number of nacks (explicit or by drop).
    #[must_use]
    pub fn nack_count(&self) -> usize {
        self.state.lock().unwrap().nacked
    }

    /// Messages waiting in `queue` (not counting in-flight deliveries).
    #[must_use]
    pub fn pending(&self, queue: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    /// Wait until at least `count` messages have been acknowledged.
    ///
    /// Wrap in `tokio::time::timeout` to bound the wait.
    pub async fn wait_for_acks(&self, count: usize) {
        loop {
            let notified = self.settled.notified();
            if self.state.lock().unwrap().acked.len() >= count {
                return;
            }
            notified.await;
        }
    }

    /// Wait until at least `count` nacks have been recorded.
    pub async fn wait_for_nacks(&self, count: usize) {
        loop {
            let notified = self.settled.notified();
            if self.state.lock().unwrap().nacked >= count {
                return;
            }
            notified.await;
        }
    }
}

impl MessageQueue for InMemoryQueue {
    fn declare_queue(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        let queue = queue.to_string();
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.declare_calls += 1;
            if state.offline {
                return Err(QueueError::ConnectionFailed("broker offline".to_string()));
            }
            if state.refusing_declares {
                return Err(QueueError::DeclareFailed {
                    queue,
                    reason: "not authorized".to_string(),
                });
            }
            state.queues.entry(queue).or_default();
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
        Box::pin(async move {
            let stalled = self.state.lock().unwrap().stalled;
            if stalled {
                std::future::pending::<()>().await;
            }
            {
                let mut state = self.state.lock().unwrap();
                let failure = if state.offline {
                    Some("broker offline")
                } else if state.failing_publishes > 0 {
                    state.failing_publishes -= 1;
                    Some("injected failure")
                } else {
                    None
                };
                if let Some(reason) = failure {
                    return Err(QueueError::PublishFailed {
                        queue,
                        reason: reason.to_string(),
                    });
                }

                let Some(pending) = state.queues.get_mut(&queue) else {
                    return Err(QueueError::PublishFailed {
                        queue,
                        reason: "queue not declared".to_string(),
                    });
                };
                pending.push_back(Pending {
                    message: message.clone(),
                    redelivered: false,
                });
                state.published.push((queue, message));
            }
            self.available.notify_waiters();
            Ok(())
        })
    }

    fn subscribe(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, QueueError>> + Send + '_>> {
        let queue = queue.to_string();
        Box::pin(async move {
            {
                let mut state = self.state.lock().unwrap();
                if state.failing_subscribes > 0 {
                    state.failing_subscribes -= 1;
                    return Err(QueueError::SubscriptionFailed {
                        queue,
                        reason: "injected failure".to_string(),
                    });
                }
                state.queues.entry(queue.clone()).or_default();
            }

            let this = self.clone();
            let stream = async_stream::stream! {
                let mut open = true;
                while open {
                    let notified = this.available.notified();
                    let next = {
                        let mut state = this.state.lock().unwrap();
                        open = !state.closed;
                        let next = if open {
                            state.queues.get_mut(&queue).and_then(VecDeque::pop_front)
                        } else {
                            None
                        };
                        if let Some(pending) = &next {
                            state.delivered.push((pending.message.clone(), pending.redelivered));
                        }
                        next
                    };

                    match next {
                        Some(pending) => {
                            let acker = InMemoryAcker {
                                queue: this.clone(),
                                name: queue.clone(),
                                message: pending.message.clone(),
                            };
                            yield Ok(Delivery::new(pending.message, pending.redelivered, Box::new(acker)));
                        }
                        None if open => notified.await,
                        None => {}
                    }
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}

struct InMemoryAcker {
    queue: InMemoryQueue,
    name: String,
    message: QueueMessage,
}

impl Acknowledger for InMemoryAcker {
    fn settle(self: Box<Self>, settlement: Settlement) -> Result<(), QueueError> {
        let Self {
            queue,
            name,
            message,
        } = *self;
        {
            let mut state = queue.state.lock().unwrap();
            match settlement {
                Settlement::Ack => state.acked.push(message),
                Settlement::Nack => {
                    state.nacked += 1;
                    state.queues.entry(name).or_default().push_front(Pending {
                        message,
                        redelivered: true,
                    });
                }
            }
        }
        queue.available.notify_waiters();
        queue.settled.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn message(body: &str) -> QueueMessage {
        QueueMessage::durable("k", body.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_publish_requires_declare() {
        let queue = InMemoryQueue::new();
        let err = queue.publish("q", &message("a")).await.unwrap_err();
        assert!(matches!(err, QueueError::PublishFailed { .. }));

        queue.declare_queue("q").await.unwrap();
        queue.publish("q", &message("a")).await.unwrap();
        assert_eq!(queue.pending("q"), 1);
    }

    #[tokio::test]
    async fn test_ack_removes_message() {
        let queue = InMemoryQueue::new();
        queue.declare_queue("q").await.unwrap();
        queue.publish("q", &message("a")).await.unwrap();

        let mut stream = queue.subscribe("q").await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        assert!(!delivery.is_redelivered());
        delivery.ack().unwrap();

        assert_eq!(queue.acked(), vec![message("a")]);
        assert_eq!(queue.pending("q"), 0);
    }

    #[tokio::test]
    async fn test_nack_redelivers_first_with_flag() {
        let queue = InMemoryQueue::new();
        queue.declare_queue("q").await.unwrap();
        queue.publish("q", &message("a")).await.unwrap();
        queue.publish("q", &message("b")).await.unwrap();

        let mut stream = queue.subscribe("q").await.unwrap();
        stream.next().await.unwrap().unwrap().nack().unwrap();

        let again = stream.next().await.unwrap().unwrap();
        assert_eq!(again.payload(), b"a");
        assert!(again.is_redelivered());
        assert_eq!(queue.nack_count(), 1);
    }

    #[tokio::test]
    async fn test_subscriber_wakes_on_publish() {
        let queue = InMemoryQueue::new();
        queue.declare_queue("q").await.unwrap();
        let mut stream = queue.subscribe("q").await.unwrap();

        let publisher = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            publisher.publish("q", &message("late")).await.unwrap();
        });

        let delivery = stream.next().await.unwrap().unwrap();
        assert_eq!(delivery.payload(), b"late");
    }

    #[tokio::test]
    async fn test_close_ends_idle_subscription() {
        let queue = InMemoryQueue::new();
        queue.declare_queue("q").await.unwrap();
        let mut stream = queue.subscribe("q").await.unwrap();

        let closer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            closer.close();
        });

        let ended = tokio::time::timeout(std::time::Duration::from_secs(5), stream.next())
            .await
            .unwrap();
        assert!(ended.is_none());
    }

    #[tokio::test]
    async fn test_close_leaves_pending_messages() {
        let queue = InMemoryQueue::new();
        queue.declare_queue("q").await.unwrap();
        queue.publish("q", &message("a")).await.unwrap();
        queue.close();

        let mut stream = queue.subscribe("q").await.unwrap();
        assert!(stream.next().await.is_none());
        assert_eq!(queue.pending("q"), 1);
        assert!(queue.deliveries().is_empty());
    }

    #[tokio::test]
    async fn test_offline_fails_declare_and_publish() {
        let queue = InMemoryQueue::new();
        queue.declare_queue("q").await.unwrap();
        queue.set_offline(true);

        assert!(queue.declare_queue("q").await.is_err());
        assert!(queue.publish("q", &message("a")).await.is_err());
        assert!(queue.published("q").is_empty());
    }
}

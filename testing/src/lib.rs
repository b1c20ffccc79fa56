//! # User Service Testing
//!
//! In-memory collaborators for testing the user service without PostgreSQL
//! or a broker.
//!
//! This crate provides:
//! - [`InMemoryUserStore`]: `HashMap`-backed store with uniqueness rules
//! - [`InMemoryQueue`]: work queue with ack, nack, redelivery and failure injection
//! - [`RecordingHandler`] and [`FailingHandler`]: consumer handlers for assertions
//! - [`fixtures`]: wiring helpers
//!
//! ## Example
//!
//! ```ignore
//! use user_service_testing::fixtures::{self, service_with_memory};
//!
//! #[tokio::test]
//! async fn test_create_publishes() {
//!     let (service, _store, queue) = service_with_memory();
//!     service.create_user(Some("alice".into()), Some("a@x.io".into())).await.unwrap();
//!     assert_eq!(queue.published(fixtures::QUEUE).len(), 1);
//! }
//! ```

/// In-memory event handlers
pub mod handler_mocks;

/// In-memory message queue
pub mod queue_mocks;

/// In-memory user store
pub mod store_mocks;

/// Wiring helpers shared by runtime and web tests.
pub mod fixtures {
    use crate::{InMemoryQueue, InMemoryUserStore};
    use std::sync::Arc;
    use std::time::Duration;
    use user_service_runtime::publisher::EventPublisher;
    use user_service_runtime::retry::RetryPolicy;
    use user_service_runtime::service::UserService;

    /// Queue name used by the fixtures.
    pub const QUEUE: &str = "task_queue";

    /// Publisher over `queue` with a fast retry policy for tests.
    #[must_use]
    pub fn publisher(queue: &InMemoryQueue) -> EventPublisher {
        EventPublisher::new(Arc::new(queue.clone()), QUEUE).with_retry_policy(
            RetryPolicy::builder()
                .max_retries(1)
                .initial_delay(Duration::from_millis(1))
                .build(),
        )
    }

    /// A [`UserService`] over fresh in-memory collaborators.
    ///
    /// Returns handles to the store and queue for assertions.
    #[must_use]
    pub fn service_with_memory() -> (UserService, InMemoryUserStore, InMemoryQueue) {
        let store = InMemoryUserStore::new();
        let queue = InMemoryQueue::new();
        let service = UserService::new(Arc::new(store.clone()), Arc::new(publisher(&queue)));
        (service, store, queue)
    }
}

pub use handler_mocks::{FailingHandler, RecordingHandler};
pub use queue_mocks::InMemoryQueue;
pub use store_mocks::InMemoryUserStore;

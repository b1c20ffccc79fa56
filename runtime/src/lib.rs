//! # User Service Runtime
//!
//! The moving parts between the domain types in `user-service-core` and the
//! concrete adapters (Postgres, Redpanda, HTTP).
//!
//! ## Core Components
//!
//! - **`UserService`**: validate, commit to the store, then publish the event
//! - **`EventPublisher`**: declares the queue once and publishes with retry
//! - **`EventConsumer`**: subscribe loop with ack-after-success and drain on shutdown
//! - **`EventHandler`**: what the consumer does with each decoded event
//!
//! ## Example
//!
//! ```ignore
//! use user_service_runtime::{EventPublisher, UserService};
//!
//! let publisher = Arc::new(EventPublisher::new(queue.clone(), "task_queue"));
//! let service = UserService::new(store, publisher);
//!
//! let user = service
//!     .create_user(Some("alice".into()), Some("alice@example.com".into()))
//!     .await?;
//! ```

/// Queue consumer loop
pub mod consumer;

/// Event handlers invoked by the consumer
pub mod handler;

/// Prometheus metrics for observability
pub mod metrics;

/// Event publishing with declare-once and retry
pub mod publisher;

/// Retry logic with exponential backoff
pub mod retry;

/// The user resource API
pub mod service;

pub use consumer::EventConsumer;
pub use handler::{EventHandler, HandlerError, LoggingHandler};
pub use metrics::{MetricsError, MetricsRecorder};
pub use publisher::{EventPublisher, PublishError};
pub use retry::RetryPolicy;
pub use service::{ServiceError, UserService};

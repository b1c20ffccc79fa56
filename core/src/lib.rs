//! # User Service Core
//!
//! Domain types and collaborator traits for the event-driven user service.
//!
//! The service mutates a persisted user record and, after each successful
//! mutation, publishes a durable event describing it to a work queue that a
//! concurrently running consumer drains.
//!
//! ## Data Flow
//!
//! ```text
//! client ─► Resource API ─► UserStore ─► EventPublisher ─► queue ─► EventConsumer
//! ```
//!
//! ## Modules
//!
//! - [`user`]: the user record, identifiers and validated inputs
//! - [`event`]: the domain event and its wire encoding
//! - [`store`]: the [`store::UserStore`] trait and its error type
//! - [`queue`]: the [`queue::MessageQueue`] trait, deliveries and acknowledgment
//!
//! Implementations live in sibling crates: `user-service-postgres`,
//! `user-service-redpanda`, and in-memory versions in `user-service-testing`.

pub mod event;
pub mod queue;
pub mod store;
pub mod user;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use event::{DecodeError, EncodeError, UserAction, UserEvent};
pub use queue::{
    Acknowledger, Delivery, DeliveryStream, MessageQueue, QueueError, QueueMessage, Settlement,
};
pub use store::{StoreError, UniqueField, UserStore};
pub use user::{NewUser, User, UserChanges, UserId, ValidationError};

//! User service: the transport-independent resource API.
//!
//! Every mutating call walks the same state machine:
//!
//! ```text
//! Received ──validate──► Validated ──store──► Mutated ──publish──► Responded
//!     │                      │                                        ▲
//!     └── ValidationError ───┴── Conflict / NotFound ─────────────────┘
//! ```
//!
//! The store commit happens first. The event is published only if it
//! succeeded, and a publish failure is logged and counted but never undoes
//! the mutation or changes the caller's result.

use crate::publisher::EventPublisher;
use std::sync::Arc;
use thiserror::Error;
use user_service_core::event::UserEvent;
use user_service_core::store::{StoreError, UserStore};
use user_service_core::user::{NewUser, User, UserChanges, UserId, ValidationError};

/// Errors the API reports to clients.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Input was missing or malformed
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The store rejected the operation
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Create, read, update and delete users, publishing an event per mutation.
#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn UserStore>,
    publisher: Arc<EventPublisher>,
}

impl UserService {
    /// Create a service over a store and a publisher.
    #[must_use]
    pub fn new(store: Arc<dyn UserStore>, publisher: Arc<EventPublisher>) -> Self {
        Self { store, publisher }
    }

    /// The underlying store (used by readiness checks).
    #[must_use]
    pub fn store(&self) -> &Arc<dyn UserStore> {
        &self.store
    }

    /// Create a user and publish a `create` event.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Validation`] if a field is missing or malformed
    /// - [`ServiceError::Store`] with [`StoreError::Conflict`] if the username
    ///   or email is taken; nothing is published
    pub async fn create_user(
        &self,
        username: Option<String>,
        email: Option<String>,
    ) -> Result<User, ServiceError> {
        let new_user = NewUser::parse(username, email)?;
        let user = self.store.create(new_user).await?;

        tracing::info!(user_id = %user.id, "User created");
        self.publish_best_effort(UserEvent::created(&user)).await;
        Ok(user)
    }

    /// Fetch a user. Never publishes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no user has this id.
    pub async fn get_user(&self, id: UserId) -> Result<User, ServiceError> {
        Ok(self.store.get(id).await?)
    }

    /// Apply a partial update and publish an `update` event.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Validation`] if no field is given or one is malformed
    /// - [`ServiceError::Store`] with `NotFound` or `Conflict`; nothing is published
    pub async fn update_user(
        &self,
        id: UserId,
        username: Option<String>,
        email: Option<String>,
    ) -> Result<User, ServiceError> {
        let changes = UserChanges::parse(username, email)?;
        let user = self.store.update(id, changes).await?;

        tracing::info!(user_id = %user.id, "User updated");
        self.publish_best_effort(UserEvent::updated(&user)).await;
        Ok(user)
    }

    /// Delete a user and publish a `delete` event carrying its last fields.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no user has this id; nothing is published.
    pub async fn delete_user(&self, id: UserId) -> Result<User, ServiceError> {
        let user = self.store.delete(id).await?;

        tracing::info!(user_id = %user.id, "User deleted");
        self.publish_best_effort(UserEvent::deleted(&user)).await;
        Ok(user)
    }

    async fn publish_best_effort(&self, event: UserEvent) {
        if let Err(e) = self.publisher.publish(&event).await {
            tracing::warn!(
                user_id = %event.id,
                action = %event.action,
                queue = %self.publisher.queue_name(),
                error = %e,
                "Failed to publish user event; mutation stands"
            );
        }
    }
}

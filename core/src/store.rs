//! Persistent store abstraction for user records.
//!
//! The store is the source of truth. It enforces that no two live users share
//! a username or an email, and reports violations as [`StoreError::Conflict`]
//! without changing any state.
//!
//! # Implementations
//!
//! - `PostgresUserStore` (crate `user-service-postgres`): production
//! - `InMemoryUserStore` (crate `user-service-testing`): tests

use crate::user::{NewUser, User, UserChanges, UserId};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Field covered by a uniqueness constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UniqueField {
    /// `username` column
    Username,
    /// `email` column
    Email,
}

impl UniqueField {
    /// Field name as exposed to clients.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Username => "username",
            Self::Email => "email",
        }
    }
}

impl fmt::Display for UniqueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Another user already holds this value
    #[error("A user with {field} '{value}' already exists")]
    Conflict {
        /// Constrained field
        field: UniqueField,
        /// Value that collided
        value: String,
    },

    /// No user with this id
    #[error("User with id {0} not found")]
    NotFound(UserId),

    /// Store unreachable or failed unexpectedly
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Trait for user store implementations.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` so the store can be shared as
/// `Arc<dyn UserStore>` between HTTP handlers and background tasks.
pub trait UserStore: Send + Sync {
    /// Insert a new user under a fresh id.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Conflict`] if the username or email is taken
    /// - [`StoreError::Backend`] on infrastructure failure
    fn create(
        &self,
        user: NewUser,
    ) -> Pin<Box<dyn Future<Output = Result<User, StoreError>> + Send + '_>>;

    /// Fetch a user by id.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if no user has this id
    /// - [`StoreError::Backend`] on infrastructure failure
    fn get(&self, id: UserId)
    -> Pin<Box<dyn Future<Output = Result<User, StoreError>> + Send + '_>>;

    /// Apply a partial update and return the updated record.
    ///
    /// Fields absent from `changes` keep their previous values.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if no user has this id
    /// - [`StoreError::Conflict`] if a new value is held by another user
    /// - [`StoreError::Backend`] on infrastructure failure
    fn update(
        &self,
        id: UserId,
        changes: UserChanges,
    ) -> Pin<Box<dyn Future<Output = Result<User, StoreError>> + Send + '_>>;

    /// Remove a user and return the record as it was before removal.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if no user has this id
    /// - [`StoreError::Backend`] on infrastructure failure
    fn delete(
        &self,
        id: UserId,
    ) -> Pin<Box<dyn Future<Output = Result<User, StoreError>> + Send + '_>>;

    /// Check the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if it is not.
    fn ping(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;
}

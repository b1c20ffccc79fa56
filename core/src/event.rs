//! Domain events describing committed user mutations.
//!
//! A [`UserEvent`] is built only after the store has committed a mutation and
//! carries a snapshot of the user's mutable fields at that moment. Events are
//! encoded as JSON so any consumer, in any language, can read the queue.
//!
//! # Wire Format
//!
//! ```json
//! {
//!   "id": "1b4e28ba-2fa1-11d2-883f-0016d3cca427",
//!   "action": "create",
//!   "username": "alice",
//!   "email": "alice@example.com",
//!   "occurred_at": "2024-05-01T12:00:00Z"
//! }
//! ```
//!
//! Delete events carry the same fields as create and update events.

use crate::queue::QueueMessage;
use crate::user::{User, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failed to encode an event to bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to encode event: {0}")]
pub struct EncodeError(String);

/// A queue payload that is not a well-formed [`UserEvent`].
///
/// Consumers acknowledge and drop such messages: redelivery cannot fix them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to decode event: {0}")]
pub struct DecodeError(String);

/// Kind of mutation an event describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserAction {
    /// A user was created
    Create,
    /// A user was updated
    Update,
    /// A user was deleted
    Delete,
}

impl UserAction {
    /// Wire name of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for UserAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one committed mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEvent {
    /// User the mutation applied to
    pub id: UserId,
    /// What happened
    pub action: UserAction,
    /// Username at the time of the mutation
    pub username: String,
    /// Email at the time of the mutation
    pub email: String,
    /// When the event was built
    pub occurred_at: DateTime<Utc>,
}

impl UserEvent {
    /// Snapshot `user` as an event of kind `action`.
    #[must_use]
    pub fn new(action: UserAction, user: &User) -> Self {
        Self {
            id: user.id,
            action,
            username: user.username.clone(),
            email: user.email.clone(),
            occurred_at: Utc::now(),
        }
    }

    /// Event for a freshly created user.
    #[must_use]
    pub fn created(user: &User) -> Self {
        Self::new(UserAction::Create, user)
    }

    /// Event for an updated user, carrying the post-update fields.
    #[must_use]
    pub fn updated(user: &User) -> Self {
        Self::new(UserAction::Update, user)
    }

    /// Event for a deleted user, carrying the fields it had when removed.
    #[must_use]
    pub fn deleted(user: &User) -> Self {
        Self::new(UserAction::Delete, user)
    }

    /// Encode to the JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        serde_json::to_vec(self).map_err(|e| EncodeError(e.to_string()))
    }

    /// Decode from the JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if `bytes` are not valid JSON or miss a field.
    ///
    /// # Examples
    ///
    /// ```
    /// use user_service_core::event::UserEvent;
    ///
    /// assert!(UserEvent::from_bytes(b"not json").is_err());
    /// ```
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(bytes).map_err(|e| DecodeError(e.to_string()))
    }

    /// Wrap the encoded event in a durable queue message keyed by user id.
    ///
    /// Keying by user keeps every event for one user on one partition, which
    /// preserves per-user causal order on partitioned transports.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] if serialization fails.
    pub fn to_message(&self) -> Result<QueueMessage, EncodeError> {
        Ok(QueueMessage::durable(self.id.to_string(), self.to_bytes()?))
    }
}

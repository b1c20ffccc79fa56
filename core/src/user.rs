//! User record, identifiers and validated inputs.
//!
//! Raw request data never reaches a [`UserStore`](crate::store::UserStore)
//! directly. It is first parsed into a [`NewUser`] or [`UserChanges`], which
//! guarantee that every field the store sees is present and well formed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Longest accepted username or email, in characters.
pub const MAX_FIELD_LEN: usize = 255;

/// Error type for `UserId` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid user ID: {0}")]
pub struct ParseUserIdError(String);

/// Store-assigned identifier of a user record.
///
/// Opaque to clients and immutable for the lifetime of the record.
///
/// # Examples
///
/// ```
/// use user_service_core::user::UserId;
///
/// let id = UserId::new();
/// let parsed: UserId = id.to_string().parse().unwrap();
/// assert_eq!(id, parsed);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = ParseUserIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ParseUserIdError(s.to_string()))
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// A persisted user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Store-assigned identifier
    pub id: UserId,
    /// Unique username
    pub username: String,
    /// Unique email address
    pub email: String,
}

/// Input rejected before it reaches the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field was absent or blank
    #[error("Field '{0}' is required")]
    Missing(&'static str),

    /// A field exceeded [`MAX_FIELD_LEN`]
    #[error("Field '{field}' must be at most {max} characters")]
    TooLong {
        /// Offending field
        field: &'static str,
        /// Maximum length
        max: usize,
    },

    /// The email address is not of the form `local@domain`
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    /// An update named no fields at all
    #[error("At least one of 'username' or 'email' must be provided")]
    EmptyChanges,
}

/// Validated input for creating a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewUser {
    username: String,
    email: String,
}

impl NewUser {
    /// Validate raw create input.
    ///
    /// Both fields are trimmed; a missing or blank field is rejected instead
    /// of being defaulted.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if either field is missing, too long, or
    /// the email is malformed.
    ///
    /// # Examples
    ///
    /// ```
    /// use user_service_core::user::{NewUser, ValidationError};
    ///
    /// let user = NewUser::parse(Some("alice".into()), Some("a@x.io".into())).unwrap();
    /// assert_eq!(user.username(), "alice");
    ///
    /// let err = NewUser::parse(Some("alice".into()), None).unwrap_err();
    /// assert_eq!(err, ValidationError::Missing("email"));
    /// ```
    pub fn parse(
        username: Option<String>,
        email: Option<String>,
    ) -> Result<Self, ValidationError> {
        let username = parse_username(username.ok_or(ValidationError::Missing("username"))?)?;
        let email = parse_email(email.ok_or(ValidationError::Missing("email"))?)?;
        Ok(Self { username, email })
    }

    /// Validated username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Validated email.
    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Materialize the record under a store-assigned id.
    #[must_use]
    pub fn into_user(self, id: UserId) -> User {
        User {
            id,
            username: self.username,
            email: self.email,
        }
    }
}

/// Validated partial update. Absent fields keep their previous values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserChanges {
    username: Option<String>,
    email: Option<String>,
}

impl UserChanges {
    /// Validate raw update input.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyChanges`] if neither field is present,
    /// or the field-level error for a present but invalid field.
    pub fn parse(
        username: Option<String>,
        email: Option<String>,
    ) -> Result<Self, ValidationError> {
        if username.is_none() && email.is_none() {
            return Err(ValidationError::EmptyChanges);
        }
        Ok(Self {
            username: username.map(parse_username).transpose()?,
            email: email.map(parse_email).transpose()?,
        })
    }

    /// New username, if changing.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// New email, if changing.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Apply the changes to a copy of `user`.
    #[must_use]
    pub fn apply_to(&self, user: &User) -> User {
        User {
            id: user.id,
            username: self.username.clone().unwrap_or_else(|| user.username.clone()),
            email: self.email.clone().unwrap_or_else(|| user.email.clone()),
        }
    }
}

fn parse_username(raw: String) -> Result<String, ValidationError> {
    required("username", raw)
}

fn parse_email(raw: String) -> Result<String, ValidationError> {
    let value = required("email", raw)?;
    match value.split_once('@') {
        Some((local, domain))
            if !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !value.chars().any(char::is_whitespace) =>
        {
            Ok(value)
        }
        _ => Err(ValidationError::InvalidEmail(value)),
    }
}

fn required(field: &'static str, raw: String) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Missing(field));
    }
    if trimmed.chars().count() > MAX_FIELD_LEN {
        return Err(ValidationError::TooLong { field, max: MAX_FIELD_LEN });
    }
    Ok(trimmed.to_string())
}

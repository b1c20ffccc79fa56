//! `PostgreSQL` user store for the user service.
//!
//! This crate provides [`PostgresUserStore`], an implementation of the
//! [`UserStore`] trait from `user-service-core` backed by a sqlx connection
//! pool. Uniqueness of `username` and `email` is enforced by table constraints
//! so concurrent writers cannot race past it:
//!
//! - `users_username_key` → [`StoreError::Conflict`] on `username`
//! - `users_email_key` → [`StoreError::Conflict`] on `email`
//!
//! A violation of any other unique constraint is reported against `username`.
//!
//! # Example
//!
//! ```no_run
//! use user_service_postgres::PostgresUserStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresUserStore::connect("postgres://localhost/users", 10).await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::future::Future;
use std::pin::Pin;
use user_service_core::store::{StoreError, UniqueField, UserStore};
use user_service_core::user::{NewUser, User, UserChanges, UserId};
use uuid::Uuid;

const EMAIL_CONSTRAINT: &str = "users_email_key";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: UserId::from_uuid(row.id),
            username: row.username,
            email: row.email,
        }
    }
}

/// `PostgreSQL`-backed [`UserStore`].
#[derive(Clone, Debug)]
pub struct PostgresUserStore {
    pool: PgPool,
}

impl PostgresUserStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a new pool to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to connect: {e}")))?;

        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    /// Run the embedded migrations (creates the `users` table).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Translate a sqlx error, turning unique violations into conflicts.
///
/// `username` and `email` are the values the statement tried to write; the
/// violated constraint decides which one is reported.
fn map_write_error(
    error: sqlx::Error,
    username: Option<&str>,
    email: Option<&str>,
    context: &str,
) -> StoreError {
    if let sqlx::Error::Database(db_err) = &error {
        if db_err.is_unique_violation() {
            let field = match db_err.constraint() {
                Some(EMAIL_CONSTRAINT) => UniqueField::Email,
                _ => UniqueField::Username,
            };
            let value = match field {
                UniqueField::Email => email,
                UniqueField::Username => username,
            };
            metrics::counter!("user_store_conflicts_total", "field" => field.as_str())
                .increment(1);
            return StoreError::Conflict {
                field,
                value: value.unwrap_or_default().to_string(),
            };
        }
    }
    StoreError::Backend(format!("Failed to {context}: {error}"))
}

impl UserStore for PostgresUserStore {
    fn create(
        &self,
        user: NewUser,
    ) -> Pin<Box<dyn Future<Output = Result<User, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query_as::<_, UserRow>(
                r"
                INSERT INTO users (username, email)
                VALUES ($1, $2)
                RETURNING id, username, email
                ",
            )
            .bind(user.username())
            .bind(user.email())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                map_write_error(e, Some(user.username()), Some(user.email()), "create user")
            })?;

            tracing::debug!(user_id = %row.id, "User inserted");
            Ok(row.into())
        })
    }

    fn get(
        &self,
        id: UserId,
    ) -> Pin<Box<dyn Future<Output = Result<User, StoreError>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query_as::<_, UserRow>("SELECT id, username, email FROM users WHERE id = $1")
                .bind(*id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(format!("Failed to get user: {e}")))?
                .map(User::from)
                .ok_or(StoreError::NotFound(id))
        })
    }

    fn update(
        &self,
        id: UserId,
        changes: UserChanges,
    ) -> Pin<Box<dyn Future<Output = Result<User, StoreError>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query_as::<_, UserRow>(
                r"
                UPDATE users
                SET username = COALESCE($2, username),
                    email = COALESCE($3, email),
                    updated_at = now()
                WHERE id = $1
                RETURNING id, username, email
                ",
            )
            .bind(*id.as_uuid())
            .bind(changes.username())
            .bind(changes.email())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_write_error(e, changes.username(), changes.email(), "update user"))?
            .map(User::from)
            .ok_or(StoreError::NotFound(id))
        })
    }

    fn delete(
        &self,
        id: UserId,
    ) -> Pin<Box<dyn Future<Output = Result<User, StoreError>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query_as::<_, UserRow>(
                "DELETE FROM users WHERE id = $1 RETURNING id, username, email",
            )
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to delete user: {e}")))?
            .map(User::from)
            .ok_or(StoreError::NotFound(id))
        })
    }

    fn ping(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map(|_| ())
                .map_err(|e| StoreError::Backend(format!("Ping failed: {e}")))
        })
    }
}

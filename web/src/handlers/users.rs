//! User resource endpoints.
//!
//! - `POST /users` - Create a user
//! - `GET /users/:id` - Fetch a user
//! - `PUT /users/:id` - Update username and/or email
//! - `DELETE /users/:id` - Delete a user
//!
//! Each successful mutation publishes an event to the work queue. Publishing
//! is best-effort and never changes the response.

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use user_service_core::user::{User, UserId};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to create a user. Both fields are required.
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    /// Unique username
    pub username: Option<String>,
    /// Unique email address
    pub email: Option<String>,
}

/// Request to update a user. At least one field is required.
#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    /// New username
    pub username: Option<String>,
    /// New email address
    pub email: Option<String>,
}

/// User representation returned to clients.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserResponse {
    /// User ID
    pub id: Uuid,
    /// Username
    pub username: String,
    /// Email address
    pub email: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: *user.id.as_uuid(),
            username: user.username,
            email: user.email,
        }
    }
}

/// An id that is not a UUID cannot name a user.
fn parse_id(raw: &str) -> Result<UserId, AppError> {
    raw.parse().map_err(|_| AppError::not_found("User", raw))
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a user.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:5000/users \
///   -H "Content-Type: application/json" \
///   -d '{"username": "alice", "email": "alice@example.com"}'
/// # 201 {"id":"…","username":"alice","email":"alice@example.com"}
/// ```
///
/// # Errors
///
/// - `400` if the body is not valid JSON
/// - `422` if a field is missing or malformed
/// - `409` if the username or email is taken
/// - `503` if the store is unavailable
pub async fn create_user(
    State(state): State<AppState>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let Json(request) = payload?;
    let user = state
        .service
        .create_user(request.username, request.email)
        .await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

/// Fetch a user by id.
///
/// # Errors
///
/// - `404` if no user has this id
/// - `503` if the store is unavailable
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, AppError> {
    let id = parse_id(&id)?;
    let user = state.service.get_user(id).await?;
    Ok(Json(user.into()))
}

/// Update a user's username and/or email.
///
/// # Errors
///
/// - `400` if the body is not valid JSON
/// - `422` if no field is given or one is malformed
/// - `404` if no user has this id
/// - `409` if a new value is taken by another user
/// - `503` if the store is unavailable
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, AppError> {
    let id = parse_id(&id)?;
    let Json(request) = payload?;
    let user = state
        .service
        .update_user(id, request.username, request.email)
        .await?;
    Ok(Json(user.into()))
}

/// Delete a user.
///
/// # Errors
///
/// - `404` if no user has this id
/// - `503` if the store is unavailable
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    state.service.delete_user(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

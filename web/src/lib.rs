//! Axum HTTP surface for the user service.
//!
//! # Request Flow
//!
//! 1. **HTTP Request** arrives at an Axum handler
//! 2. **Extract** the path id and JSON body (malformed JSON → `400`)
//! 3. **Call** the `UserService`, which validates, commits and publishes
//! 4. **Map** the result or [`AppError`] to an HTTP response
//!
//! # Example
//!
//! ```ignore
//! use user_service_web::{build_router, AppState};
//!
//! let app = build_router(AppState::new(service).with_metrics(handle));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:5000").await?;
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

// Re-export key types for convenience
pub use error::AppError;
pub use router::{build_router, REQUEST_ID_HEADER};
pub use state::AppState;


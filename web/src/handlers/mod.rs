//! HTTP handlers.

/// Liveness and readiness
pub mod health;

/// Prometheus scrape endpoint
pub mod metrics;

/// User resource CRUD
pub mod users;

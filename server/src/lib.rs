//! User service server: configuration and process lifecycle.
//!
//! The binary in `main.rs` wires the Postgres store, the Redpanda queue, the
//! HTTP router and the event consumer together and hands them to
//! [`lifecycle::Application`].

pub mod config;
pub mod lifecycle;

pub use config::{Config, ConfigError};
pub use lifecycle::Application;

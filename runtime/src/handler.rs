//! Event handler trait and the default logging handler.
//!
//! The [`EventConsumer`](crate::consumer::EventConsumer) decodes each delivery
//! into a [`UserEvent`] and passes it to an [`EventHandler`]. The handler's
//! result decides the delivery's fate:
//!
//! - `Ok(())` → acknowledged, never delivered again
//! - `Err(_)` → returned to the queue and redelivered later
//!
//! Because redelivery is possible, handlers must be idempotent.

use async_trait::async_trait;
use user_service_core::event::UserEvent;

/// Error returned by a failing handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Processes decoded user events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event was not processed; it will be redelivered.
    async fn handle(&self, event: &UserEvent) -> Result<(), HandlerError>;
}

/// Handler that records each event in the log and always succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

#[async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &UserEvent) -> Result<(), HandlerError> {
        tracing::info!(
            user_id = %event.id,
            action = %event.action,
            username = %event.username,
            email = %event.email,
            occurred_at = %event.occurred_at,
            "Received user event"
        );
        Ok(())
    }
}

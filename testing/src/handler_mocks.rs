//! Event handlers for consumer tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use user_service_core::event::UserEvent;
use user_service_runtime::handler::{EventHandler, HandlerError};

/// Handler that records every event it successfully handled.
///
/// With [`with_delay`](Self::with_delay) it sleeps before recording, which
/// lets tests shut a consumer down while a handler is in flight.
#[derive(Clone, Debug, Default)]
pub struct RecordingHandler {
    events: Arc<Mutex<Vec<UserEvent>>>,
    handled: Arc<Notify>,
    delay: Option<Duration>,
}

impl RecordingHandler {
    /// Create a handler that records immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` before recording each event.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Events handled so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<UserEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Wait until at least `count` events have been handled.
    pub async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.handled.notified();
            if self.events.lock().unwrap().len() >= count {
                return;
            }
            notified.await;
        }
    }

    fn record(&self, event: &UserEvent) {
        self.events.lock().unwrap().push(event.clone());
        self.handled.notify_waiters();
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &UserEvent) -> Result<(), HandlerError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.record(event);
        Ok(())
    }
}

/// Handler that fails its first `failures` calls, then records like
/// [`RecordingHandler`].
#[derive(Clone, Debug)]
pub struct FailingHandler {
    remaining_failures: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
    inner: RecordingHandler,
}

impl FailingHandler {
    /// Fail the first `failures` calls.
    #[must_use]
    pub fn new(failures: usize) -> Self {
        Self {
            remaining_failures: Arc::new(AtomicUsize::new(failures)),
            attempts: Arc::new(AtomicUsize::new(0)),
            inner: RecordingHandler::new(),
        }
    }

    /// Calls made so far, failed or not.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Events eventually handled successfully.
    #[must_use]
    pub fn events(&self) -> Vec<UserEvent> {
        self.inner.events()
    }

    /// Wait until at least `count` events have been handled successfully.
    pub async fn wait_for(&self, count: usize) {
        self.inner.wait_for(count).await;
    }
}

#[async_trait]
impl EventHandler for FailingHandler {
    async fn handle(&self, event: &UserEvent) -> Result<(), HandlerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(format!("injected handler failure for user {}", event.id).into());
        }
        self.inner.handle(event).await
    }
}

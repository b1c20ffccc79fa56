//! Application lifecycle management and graceful shutdown.
//!
//! # Graceful Shutdown
//!
//! When a shutdown signal is received (Ctrl+C or SIGTERM):
//! 1. HTTP server stops accepting new connections and finishes in-flight requests
//! 2. Shutdown signal broadcast to the event consumer
//! 3. Consumer gets its drain window to finish the message in hand
//! 4. Clean exit

use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use user_service_runtime::consumer::EventConsumer;

/// Extra time past the drain window for the consumer to settle and exit.
const JOIN_MARGIN: Duration = Duration::from_secs(2);

/// Running application: HTTP server plus the event consumer.
pub struct Application {
    /// TCP listener for HTTP server
    listener: tokio::net::TcpListener,

    /// Axum router with all HTTP routes
    app: axum::Router,

    /// Consumer of the user event queue
    consumer: EventConsumer,

    /// Shutdown signal broadcaster; the consumer holds a receiver
    shutdown_tx: broadcast::Sender<()>,

    /// Consumer drain window
    drain_timeout: Duration,
}

impl Application {
    /// Create a new application instance.
    ///
    /// `consumer` must have been built with a receiver of `shutdown_tx` and
    /// the same `drain_timeout`.
    #[must_use]
    pub const fn new(
        listener: tokio::net::TcpListener,
        app: axum::Router,
        consumer: EventConsumer,
        shutdown_tx: broadcast::Sender<()>,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            listener,
            app,
            consumer,
            shutdown_tx,
            drain_timeout,
        }
    }

    /// Run until Ctrl+C or SIGTERM, then shut down gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server fails.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `shutdown` resolves, then shut down gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server fails.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), Box<dyn std::error::Error>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let address = self.listener.local_addr()?;

        info!("Starting event consumer");
        let consumer_handle = self.consumer.spawn();

        info!(address = %address, "HTTP server listening for requests");
        let served = axum::serve(self.listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await;

        info!("HTTP server stopped, initiating graceful shutdown...");
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(self.drain_timeout + JOIN_MARGIN, consumer_handle).await {
            Ok(Ok(())) => info!("Consumer stopped gracefully"),
            Ok(Err(e)) => warn!(error = %e, "Consumer task failed"),
            Err(_) => warn!("Consumer shutdown timed out"),
        }

        served?;
        info!("Graceful shutdown complete");
        Ok(())
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// If a handler cannot be installed the error is logged and that signal is
/// ignored; the other one still works.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

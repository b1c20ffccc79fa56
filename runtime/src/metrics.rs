//! Prometheus metrics for the publisher and consumer.
//!
//! Metrics are recorded through the `metrics` facade everywhere; installing a
//! recorder is the binary's job. [`MetricsRecorder::install`] sets up the
//! Prometheus exporter and returns a handle the HTTP layer renders on
//! `GET /metrics`.
//!
//! # Example
//!
//! ```rust,no_run
//! use user_service_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = MetricsRecorder::new();
//! recorder.install()?;
//! let text = recorder.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;
use user_service_core::event::UserAction;

pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Owner of the process-wide Prometheus recorder.
#[derive(Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Create an uninstalled recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// If a recorder is already installed (e.g. by another test), this logs
    /// a warning and leaves [`render`](Self::render) returning `None`.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Handle to the installed recorder, if this instance installed it.
    #[must_use]
    pub fn handle(&self) -> Option<PrometheusHandle> {
        self.handle.clone()
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!(
        "user_events_published_total",
        "Events published to the queue, by action"
    );
    describe_counter!(
        "user_events_publish_failures_total",
        "Events whose publish failed after retries, by action"
    );
    describe_histogram!(
        "user_events_publish_duration_seconds",
        "Time taken to publish an event, including retries"
    );
    describe_counter!(
        "user_store_conflicts_total",
        "Writes rejected by a uniqueness constraint, by field"
    );
    describe_counter!(
        "consumer_messages_acked_total",
        "Deliveries acknowledged after successful handling"
    );
    describe_counter!(
        "consumer_messages_nacked_total",
        "Deliveries returned to the queue after a handler failure"
    );
    describe_counter!(
        "consumer_messages_dropped_total",
        "Undecodable deliveries acknowledged and discarded"
    );
    describe_counter!("retry_attempts_total", "Total number of retry attempts");
    describe_counter!("retry_successes_total", "Total number of successful retries");
    describe_counter!(
        "retry_exhausted_total",
        "Total number of operations that exhausted their retries"
    );
}

/// Publisher metrics recorder.
pub struct PublishMetrics;

impl PublishMetrics {
    /// Record a successful publish.
    pub fn record_published(action: UserAction, duration: Duration) {
        counter!("user_events_published_total", "action" => action.as_str()).increment(1);
        histogram!("user_events_publish_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a publish that failed after retries.
    pub fn record_failure(action: UserAction) {
        counter!("user_events_publish_failures_total", "action" => action.as_str()).increment(1);
    }
}

/// Consumer metrics recorder.
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    /// Record an acknowledged delivery.
    pub fn record_ack() {
        counter!("consumer_messages_acked_total").increment(1);
    }

    /// Record a delivery returned for redelivery.
    pub fn record_nack() {
        counter!("consumer_messages_nacked_total").increment(1);
    }

    /// Record an undecodable delivery that was dropped.
    pub fn record_dropped() {
        counter!("consumer_messages_dropped_total").increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_starts_uninstalled() {
        let recorder = MetricsRecorder::new();
        assert!(recorder.render().is_none());
    }

    #[test]
    fn test_recorder_render() {
        let mut recorder = MetricsRecorder::new();
        recorder.install().unwrap();

        PublishMetrics::record_published(UserAction::Create, Duration::from_millis(5));
        ConsumerMetrics::record_ack();

        // Another test may have installed the global recorder first.
        if let Some(rendered) = recorder.render() {
            assert!(rendered.contains("user_events_published_total"));
            assert!(rendered.contains("consumer_messages_acked_total"));
        }
    }
}

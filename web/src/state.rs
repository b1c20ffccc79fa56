//! Application state for Axum handlers.

use metrics_exporter_prometheus::PrometheusHandle;
use user_service_runtime::service::UserService;

/// Application state shared across all HTTP handlers.
///
/// Cloned per request; both fields are cheap handles.
#[derive(Clone)]
pub struct AppState {
    /// The user resource API
    pub service: UserService,
    /// Prometheus handle; `None` disables `GET /metrics`
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create state without a metrics endpoint.
    #[must_use]
    pub const fn new(service: UserService) -> Self {
        Self {
            service,
            metrics: None,
        }
    }

    /// Serve metrics rendered from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

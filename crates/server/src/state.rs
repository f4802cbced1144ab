//! Shared application state

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use pitchcall_config::Settings;

/// State shared by every handler. Sessions themselves are per-connection
/// and never cross this boundary.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    /// Pooled client for the stateless scoring call
    pub http: reqwest::Client,
    pub metrics: PrometheusHandle,
}

impl AppState {
    pub fn new(config: Settings, metrics: PrometheusHandle) -> Self {
        Self {
            config: Arc::new(config),
            http: reqwest::Client::new(),
            metrics,
        }
    }
}

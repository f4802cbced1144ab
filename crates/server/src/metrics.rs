//! Prometheus metrics

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder. Call once at startup; the returned
/// handle renders the exposition for `/metrics`.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

pub fn record_session_started() {
    metrics::counter!("pitchcall_sessions_total").increment(1);
}

pub fn record_asr_final() {
    metrics::counter!("pitchcall_asr_finals_total").increment(1);
}

pub fn record_turn_done() {
    metrics::counter!("pitchcall_turns_total").increment(1);
}

pub fn record_hangup() {
    metrics::counter!("pitchcall_hangups_total").increment(1);
}

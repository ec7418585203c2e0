//! Process metrics: Prometheus exposition (when enabled) plus the counters
//! and gauges surfaced in `/stats`.
//!
//! Grounded on the teacher's `MetricsRecorder`: install a global recorder
//! once at startup, describe every metric name up front, record from the
//! call sites that own the event (connect, subscribe, drop, reconnect).

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct MetricsRecorder {
    handle: PrometheusHandle,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder");

        metrics::describe_gauge!("gateway_downstream_clients", "Currently connected downstream sessions");
        metrics::describe_gauge!("gateway_subscribed_symbols", "Symbols with an active upstream subscription");
        metrics::describe_counter!("gateway_upstream_reconnects_total", "Upstream reconnect attempts");
        metrics::describe_counter!("gateway_upstream_auth_failures_total", "Upstream authentication failures");
        metrics::describe_counter!("gateway_broadcast_ingress_drops_total", "Events dropped because the broadcast ingress queue was full");
        metrics::describe_counter!("gateway_downstream_drops_total", "Outbound messages dropped due to a full per-session queue");
        metrics::describe_counter!("gateway_symbol_refcount_underflow_total", "Release calls with no matching Acquire");
        metrics::describe_counter!("gateway_sessions_closed_slow_consumer_total", "Sessions closed for exceeding the slow-consumer drop threshold");

        Self { handle }
    }

    pub fn handle(&self) -> PrometheusHandle {
        self.handle.clone()
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn metrics_handler(
    axum::extract::State(handle): axum::extract::State<PrometheusHandle>,
) -> impl axum::response::IntoResponse {
    (axum::http::StatusCode::OK, handle.render())
}

pub fn record_upstream_reconnect() {
    metrics::counter!("gateway_upstream_reconnects_total").increment(1);
}

pub fn record_upstream_auth_failure() {
    metrics::counter!("gateway_upstream_auth_failures_total").increment(1);
}

pub fn record_broadcast_ingress_drop() {
    metrics::counter!("gateway_broadcast_ingress_drops_total").increment(1);
}

pub fn record_downstream_drop() {
    metrics::counter!("gateway_downstream_drops_total").increment(1);
}

pub fn record_symbol_refcount_underflow() {
    metrics::counter!("gateway_symbol_refcount_underflow_total").increment(1);
}

pub fn record_session_closed_slow_consumer() {
    metrics::counter!("gateway_sessions_closed_slow_consumer_total").increment(1);
}

pub fn set_downstream_clients(count: usize) {
    metrics::gauge!("gateway_downstream_clients").set(count as f64);
}

pub fn set_subscribed_symbols(count: usize) {
    metrics::gauge!("gateway_subscribed_symbols").set(count as f64);
}

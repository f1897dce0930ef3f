//! Prometheus metrics for storefront-payments.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;
use std::time::Instant;

/// Recorder behind the HTTP middleware counters.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Payment creation attempts by provider and outcome (ok, rejected, gateway_error).
pub static PAYMENTS_CREATED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payments_created_total",
        "Total number of payment creation attempts",
        &["provider", "outcome"]
    )
    .expect("Failed to register payments_created_total")
});

/// Applied status transitions.
pub static STATUS_TRANSITIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payment_status_transitions_total",
        "Total number of transaction status transitions applied",
        &["provider", "status"]
    )
    .expect("Failed to register payment_status_transitions_total")
});

pub static GATEWAY_ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payment_gateway_errors_total",
        "Total number of payment gateway failures by kind",
        &["provider", "kind"]
    )
    .expect("Failed to register payment_gateway_errors_total")
});

pub static GATEWAY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "payment_gateway_request_duration_seconds",
        "Payment gateway call duration in seconds",
        &["provider", "operation"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0]
    )
    .expect("Failed to register payment_gateway_request_duration_seconds")
});

/// Webhooks by provider and outcome (applied, ignored, rejected, error).
pub static WEBHOOKS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payment_webhooks_total",
        "Total number of gateway notifications received",
        &["provider", "outcome"]
    )
    .expect("Failed to register payment_webhooks_total")
});

pub static REFUNDS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "payment_refunds_total",
        "Total number of refund attempts",
        &["provider", "outcome"]
    )
    .expect("Failed to register payment_refunds_total")
});

/// Install the HTTP metrics recorder and force the payment metrics.
pub fn init_metrics() -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {}", e))?;
    METRICS_HANDLE
        .set(handle)
        .map_err(|_| anyhow::anyhow!("metrics already initialized"))?;

    Lazy::force(&PAYMENTS_CREATED);
    Lazy::force(&STATUS_TRANSITIONS);
    Lazy::force(&GATEWAY_ERRORS);
    Lazy::force(&GATEWAY_DURATION);
    Lazy::force(&WEBHOOKS);
    Lazy::force(&REFUNDS);
    Ok(())
}

/// HTTP middleware metrics followed by the payment metrics, in text format.
pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_default();

    let encoder = TextEncoder::new();
    if let Ok(payment_metrics) = encoder.encode_to_string(&prometheus::gather()) {
        output.push_str(&payment_metrics);
    }
    output
}

/// Observe one gateway call; dropped at the end of the call.
pub struct GatewayTimer {
    provider: &'static str,
    operation: &'static str,
    started: Instant,
}

impl GatewayTimer {
    pub fn start(provider: &'static str, operation: &'static str) -> Self {
        Self {
            provider,
            operation,
            started: Instant::now(),
        }
    }
}

impl Drop for GatewayTimer {
    fn drop(&mut self) {
        GATEWAY_DURATION
            .with_label_values(&[self.provider, self.operation])
            .observe(self.started.elapsed().as_secs_f64());
    }
}

pub fn record_gateway_error(provider: &str, kind: &str) {
    GATEWAY_ERRORS.with_label_values(&[provider, kind]).inc();
}

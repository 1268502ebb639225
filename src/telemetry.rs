use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogFormat;

/// Install the global `tracing` subscriber.
///
/// The filter comes from `RUST_LOG`, defaulting to `info,formula_sim=debug`.
pub fn init(format: LogFormat) {
    let filter_layer = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,formula_sim=debug"));
    let registry = tracing_subscriber::registry().with(filter_layer);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_current_span(false))
            .init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .compact(),
            )
            .init(),
    }
}

/// Install the Prometheus recorder and describe the service's metrics.
///
/// # Errors
///
/// Fails if a global recorder is already installed.
pub fn install_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_gauge!(
        "simulation_connections_active",
        "Real-time simulation sessions currently active"
    );
    describe_counter!(
        "simulation_handshakes_total",
        "Connection handshakes by outcome"
    );
    describe_counter!(
        "simulation_tickets_issued_total",
        "One-time connection tickets issued"
    );
    describe_counter!("simulation_edits_total", "Composition updates received");
    describe_counter!(
        "simulation_safety_warnings_total",
        "Composition updates that produced a safety warning"
    );
    describe_counter!(
        "simulation_analysis_total",
        "Deep-analysis calls by outcome"
    );

    Ok(handle)
}

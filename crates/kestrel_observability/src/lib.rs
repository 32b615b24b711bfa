//! Observability setup: structured logging and Prometheus metrics.

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber with structured logging.
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kestrel=debug"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Install the Prometheus exporter on `listen_addr` (e.g. `0.0.0.0:9187`).
pub fn init_metrics(listen_addr: &str) -> anyhow::Result<()> {
    let addr: std::net::SocketAddr = listen_addr.parse()?;
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("Prometheus metrics endpoint on http://{}/metrics", addr);
    Ok(())
}

/// One logical statement, end to end.
pub fn record_statement_metrics(kind: &str, duration_us: u64, success: bool, units: usize) {
    metrics::counter!(
        "kestrel_statements_total",
        "kind" => kind.to_string(),
        "success" => success.to_string()
    )
    .increment(1);
    metrics::histogram!("kestrel_statement_duration_us", "kind" => kind.to_string())
        .record(duration_us as f64);
    metrics::histogram!("kestrel_route_units", "kind" => kind.to_string()).record(units as f64);
}

pub fn record_backend_error(data_source: &str) {
    metrics::counter!("kestrel_backend_errors_total", "data_source" => data_source.to_string())
        .increment(1);
}

pub fn record_timeout(kind: &str) {
    metrics::counter!("kestrel_timeouts_total", "kind" => kind.to_string()).increment(1);
}

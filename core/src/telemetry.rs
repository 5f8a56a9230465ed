use crate::config::{LogFormat, TelemetryConfig};
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const FETCH_TOTAL: &str = "ingest_fetch_total";
pub const FETCH_DURATION: &str = "ingest_fetch_duration_seconds";
pub const PERSIST_TOTAL: &str = "ingest_persist_total";
pub const ENDPOINT_SKIPPED_TOTAL: &str = "ingest_endpoint_skipped_total";

pub fn init(config: &TelemetryConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = match config.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().pretty().with_target(false).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    if config.metrics_enabled {
        let addr: SocketAddr = ([0, 0, 0, 0], config.metrics_port).into();
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;

        tracing::info!(
            port = config.metrics_port,
            "Metrics endpoint started at http://0.0.0.0:{}/metrics",
            config.metrics_port
        );
    }

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!(FETCH_TOTAL, "Endpoint fetches by outcome");
    describe_histogram!(FETCH_DURATION, Unit::Seconds, "Endpoint fetch latency");
    describe_counter!(PERSIST_TOTAL, "Object writes by outcome");
    describe_counter!(
        ENDPOINT_SKIPPED_TOTAL,
        "Endpoint cycles skipped before any request was sent"
    );
}

pub fn shutdown() {
    tracing::info!("Shutting down telemetry");
}

#[macro_export]
macro_rules! record_metric {
    (counter, $name:expr, $value:expr, $($label:tt = $label_value:expr),*) => {
        metrics::counter!($name, $($label => $label_value),*).increment($value);
    };
    (histogram, $name:expr, $value:expr, $($label:tt = $label_value:expr),*) => {
        metrics::histogram!($name, $($label => $label_value),*).record($value);
    };
}

//! `OpenTelemetry` export pipeline and relay instruments.
//!
//! Only compiled with the `metrics` Cargo feature. Spans and metrics are
//! pushed to an OTLP endpoint (e.g. an `OpenTelemetry` Collector).

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;

/// Errors that can occur during pipeline initialisation.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to build OTLP exporter: {0}")]
    ExporterBuild(#[from] opentelemetry_otlp::ExporterBuildError),

    #[error("OpenTelemetry SDK error: {0}")]
    Sdk(#[from] opentelemetry_sdk::error::OTelSdkError),
}

/// Keeps the providers alive. Call [`MetricsGuard::shutdown`] before exit to
/// flush buffered telemetry; dropping does not flush.
pub struct MetricsGuard {
    pub(crate) tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl MetricsGuard {
    pub fn shutdown(self) -> Result<(), MetricsError> {
        self.tracer_provider.shutdown()?;
        self.meter_provider.shutdown()?;
        Ok(())
    }
}

/// Build OTLP exporters for traces and metrics and register them globally.
pub fn init_metrics(endpoint: &str) -> Result<MetricsGuard, MetricsError> {
    let span_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(span_exporter)
        .build();
    global::set_tracer_provider(tracer_provider.clone());

    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let meter_provider = SdkMeterProvider::builder()
        .with_periodic_exporter(metric_exporter)
        .build();
    global::set_meter_provider(meter_provider.clone());

    Ok(MetricsGuard {
        tracer_provider,
        meter_provider,
    })
}

/// Counters recorded by the relay core.
///
/// Instruments resolve against the global meter provider, so they are no-ops
/// until [`init_metrics`] has run.
#[derive(Clone)]
pub struct RelayMetrics {
    dropped: Counter<u64>,
    retries: Counter<u64>,
}

impl RelayMetrics {
    pub fn new() -> Self {
        let meter = global::meter("zcmweb");
        Self {
            dropped: meter
                .u64_counter("zcmweb.dispatch.dropped")
                .with_description("Inbound messages dropped by the dispatcher")
                .build(),
            retries: meter
                .u64_counter("zcmweb.native.retries")
                .with_description("Native operations re-issued after AGAIN")
                .build(),
        }
    }

    /// Record a dropped inbound message. `reason` is `unknown_type` or
    /// `malformed`.
    pub fn record_drop(&self, reason: &'static str) {
        self.dropped.add(1, &[KeyValue::new("reason", reason)]);
    }

    /// Record one AGAIN retry of operation `op`.
    pub fn record_retry(&self, op: &'static str) {
        self.retries.add(1, &[KeyValue::new("op", op)]);
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

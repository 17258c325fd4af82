//! Tracing and OpenTelemetry setup for the dispatcher.
//!
//! Logs always go to stderr through an env-filtered fmt layer. When the
//! config names an OTLP endpoint, item spans, dispatcher metrics and log
//! events are exported there as well.
//!
//! Call [`init_telemetry`] before creating any [`Dispatcher`]: its metric
//! instruments are bound at construction and stay no-ops if the meter
//! provider is installed later.
//!
//! [`Dispatcher`]: crate::Dispatcher

pub mod metrics;
pub mod work;

use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;

use crate::config::Config;
use crate::error::{Error, Result};

/// Service name and instrumentation scope for every exported signal.
pub const SERVICE_NAME: &str = "serialq";

/// Keeps the OTLP exporters alive; flushes and shuts them down on drop.
///
/// Drop it only after the dispatcher has terminated, so spans from the
/// final drain are exported.
#[must_use = "dropping the guard shuts telemetry export down"]
pub struct TelemetryGuard {
    otlp: Option<OtlpExport>,
}

impl TelemetryGuard {
    /// Whether signals are being exported beyond stderr.
    pub fn is_exporting(&self) -> bool {
        self.otlp.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(otlp) = self.otlp.take() {
            otlp.shutdown();
        }
    }
}

/// The three OTLP pipelines, built together against one endpoint.
struct OtlpExport {
    traces: SdkTracerProvider,
    metrics: SdkMeterProvider,
    logs: SdkLoggerProvider,
}

impl OtlpExport {
    fn connect(endpoint: &str) -> Result<Self> {
        use opentelemetry_otlp::WithExportConfig as _;

        let resource = opentelemetry_sdk::Resource::builder()
            .with_service_name(SERVICE_NAME)
            .build();

        let spans = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(exporter_err("span", endpoint))?;
        let metrics = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(exporter_err("metric", endpoint))?;
        let logs = opentelemetry_otlp::LogExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(exporter_err("log", endpoint))?;

        let export = Self {
            traces: SdkTracerProvider::builder()
                .with_batch_exporter(spans)
                .with_resource(resource.clone())
                .build(),
            metrics: SdkMeterProvider::builder()
                .with_periodic_exporter(metrics)
                .with_resource(resource.clone())
                .build(),
            logs: SdkLoggerProvider::builder()
                .with_batch_exporter(logs)
                .with_resource(resource)
                .build(),
        };
        // Must happen before any DispatchMetrics is built.
        opentelemetry::global::set_meter_provider(export.metrics.clone());
        Ok(export)
    }

    fn shutdown(self) {
        let _ = self.logs.shutdown();
        let _ = self.metrics.shutdown();
        let _ = self.traces.shutdown();
    }
}

fn exporter_err<E: std::fmt::Display>(signal: &str, endpoint: &str) -> impl FnOnce(E) -> Error {
    let context = format!("failed to build OTLP {signal} exporter for {endpoint}");
    move |e| Error::Other(format!("{context}: {e}"))
}

/// Install the global tracing subscriber and, if configured, OTLP export.
///
/// `RUST_LOG` overrides `config.log_level` when set.
///
/// # Errors
///
/// Fails if an OTLP exporter cannot be built or a global subscriber is
/// already installed.
pub fn init_telemetry(config: &Config) -> Result<TelemetryGuard> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let otlp = config
        .otel_endpoint
        .as_deref()
        .map(OtlpExport::connect)
        .transpose()?;

    let span_layer = otlp.as_ref().map(|o| {
        tracing_opentelemetry::layer().with_tracer(o.traces.tracer(SERVICE_NAME))
    });
    let log_layer = otlp
        .as_ref()
        .map(|o| OpenTelemetryTracingBridge::new(&o.logs));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_thread_names(true))
        .with(span_layer)
        .with(log_layer)
        .try_init()
        .map_err(|e| Error::Other(format!("failed to init tracing subscriber: {e}")))?;

    Ok(TelemetryGuard { otlp })
}

//! Logging, tracing and metric export for the operator process
//!
//! Logs are always JSON on stdout. When `OTEL_EXPORTER_OTLP_ENDPOINT` is set,
//! spans and the counters in [`crate::metrics`] are also pushed over OTLP/gRPC.
//! The returned [`TelemetryGuard`] flushes both pipelines when dropped, so the
//! last benchmark results of a shutting-down operator are not lost.

use std::time::Duration;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::{runtime, Resource};
use opentelemetry_semantic_conventions::resource as semconv;
use thiserror::Error;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

use crate::CONTROLLER_NAME;

/// Log filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info,netperf=debug,kube=info,tower=warn,hyper=warn";

/// How often metrics are pushed to the collector
pub const DEFAULT_METRIC_INTERVAL: Duration = Duration::from_secs(30);

/// Downward-API variables mapped onto resource attributes
const POD_ENV_ATTRIBUTES: [(&str, &str); 3] = [
    ("POD_NAME", semconv::K8S_POD_NAME),
    ("POD_NAMESPACE", semconv::K8S_NAMESPACE_NAME),
    ("NODE_NAME", semconv::K8S_NODE_NAME),
];

/// Telemetry setup failure
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// An OTLP exporter could not be built
    #[error("failed to build OTLP {signal} exporter: {message}")]
    Exporter {
        /// `traces` or `metrics`
        signal: &'static str,
        /// Exporter error text
        message: String,
    },

    /// The configured log filter does not parse
    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),

    /// A global subscriber was already installed
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

/// Telemetry settings
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// `service.name` on exported spans and metrics
    pub service_name: String,
    /// OTLP collector endpoint; `None` keeps everything local
    pub otlp_endpoint: Option<String>,
    /// `EnvFilter` directives for log output
    pub log_filter: String,
    /// Metric push interval
    pub metric_interval: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "netperf-operator".to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            log_filter: std::env::var("RUST_LOG")
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string()),
            metric_interval: DEFAULT_METRIC_INTERVAL,
        }
    }
}

/// Flushes exported telemetry on drop
#[must_use = "dropping the guard immediately stops OTLP export"]
#[derive(Debug, Default)]
pub struct TelemetryGuard {
    tracer: Option<TracerProvider>,
    meter: Option<SdkMeterProvider>,
}

impl TelemetryGuard {
    /// Whether spans and metrics leave the process
    pub fn is_exporting(&self) -> bool {
        self.tracer.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(tracer) = self.tracer.take() {
            if let Err(e) = tracer.shutdown() {
                eprintln!("failed to flush spans: {e}");
            }
        }
        if let Some(meter) = self.meter.take() {
            if let Err(e) = meter.shutdown() {
                eprintln!("failed to flush metrics: {e}");
            }
        }
    }
}

/// Install the global subscriber and, with an endpoint, the OTLP pipelines
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter = EnvFilter::try_new(&config.log_filter)?;
    global::set_text_map_propagator(TraceContextPropagator::new());

    let mut guard = TelemetryGuard::default();
    let otel_layer = match &config.otlp_endpoint {
        Some(endpoint) => {
            let resource = operator_resource(&config.service_name);
            let meter = meter_provider(endpoint, resource.clone(), config.metric_interval)?;
            global::set_meter_provider(meter.clone());
            let tracer = tracer_provider(endpoint, resource)?;
            global::set_tracer_provider(tracer.clone());

            let layer =
                tracing_opentelemetry::layer().with_tracer(tracer.tracer(CONTROLLER_NAME));
            guard = TelemetryGuard {
                tracer: Some(tracer),
                meter: Some(meter),
            };
            Some(layer)
        }
        None => None,
    };

    // Span fields (event, object) from #[instrument] land on every log line
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;

    Ok(guard)
}

/// Resource identifying this operator replica
fn operator_resource(service_name: &str) -> Resource {
    let mut attributes = vec![
        KeyValue::new(semconv::SERVICE_NAME, service_name.to_string()),
        KeyValue::new(semconv::SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
        KeyValue::new(semconv::SERVICE_NAMESPACE, crate::crd::API_GROUP),
    ];
    attributes.extend(
        POD_ENV_ATTRIBUTES
            .iter()
            .filter_map(|(env, key)| std::env::var(env).ok().map(|v| KeyValue::new(*key, v))),
    );
    Resource::new(attributes)
}

fn tracer_provider(endpoint: &str, resource: Resource) -> Result<TracerProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::Exporter {
            signal: "traces",
            message: e.to_string(),
        })?;

    Ok(TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(resource)
        .build())
}

fn meter_provider(
    endpoint: &str,
    resource: Resource,
    interval: Duration,
) -> Result<SdkMeterProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::Exporter {
            signal: "metrics",
            message: e.to_string(),
        })?;

    let reader = PeriodicReader::builder(exporter, runtime::Tokio)
        .with_interval(interval)
        .build();

    Ok(SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource)
        .build())
}

//! Logging and trace export.
//!
//! [`Telemetry::register`] installs the global `tracing` subscriber:
//! - an `EnvFilter` taken from `RUST_LOG`, falling back to the configured level;
//! - a `fmt` layer writing human-readable records;
//! - an OpenTelemetry layer exporting spans over OTLP/gRPC, only when
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
//!
//! The exporter picks up the rest of its settings (`OTEL_EXPORTER_OTLP_HEADERS`,
//! timeouts, ...) from the standard `OTEL_*` environment variables.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource::SERVICE_VERSION;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const ENV_OTEL_EXPORTER_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

#[derive(Debug, Clone)]
pub struct Telemetry {
    name: String,
    version: String,
    level: String,
}

/// Handles to the installed providers, kept alive until shutdown.
#[derive(Debug)]
pub struct TelemetryProviders {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            name: "event-ingest".to_string(),
            version: "0.0.0".to_string(),
            level: "info".to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Filter directive used when `RUST_LOG` is not set, e.g. `debug` or
    /// `event_ingest=debug,info`.
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    fn resource(&self) -> Resource {
        Resource::builder()
            .with_service_name(self.name.clone())
            .with_attribute(KeyValue::new(SERVICE_VERSION, self.version.clone()))
            .build()
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }

    /// Installs the global subscriber. Calling it again is a no-op apart from the
    /// returned providers.
    pub fn register(self) -> TelemetryProviders {
        let otlp_enabled = std::env::var(ENV_OTEL_EXPORTER_OTLP_ENDPOINT).is_ok();

        let tracer_provider = if otlp_enabled {
            match opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .build()
            {
                Ok(exporter) => Some(
                    SdkTracerProvider::builder()
                        .with_resource(self.resource())
                        .with_batch_exporter(exporter)
                        .build(),
                ),
                Err(e) => {
                    eprintln!("Failed to build OTLP span exporter, tracing locally only: {e}");
                    None
                }
            }
        } else {
            None
        };

        let otel_layer = tracer_provider.as_ref().map(|provider| {
            opentelemetry::global::set_tracer_provider(provider.clone());
            tracing_opentelemetry::layer().with_tracer(provider.tracer(self.name.clone()))
        });

        let initialized = tracing_subscriber::registry()
            .with(self.env_filter())
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .with(otel_layer)
            .try_init();

        if initialized.is_ok() {
            tracing::info!(
                service = %self.name,
                version = %self.version,
                otlp = otlp_enabled,
                "Telemetry initialized"
            );
        }

        TelemetryProviders { tracer_provider }
    }
}

impl TelemetryProviders {
    /// Flushes and shuts down the span exporter, if one was installed.
    pub fn shutdown(self) {
        if let Some(provider) = self.tracer_provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("Failed to shut down tracer provider: {e}");
            }
        }
    }
}

/// Request/response tracing for the HTTP servers.
pub fn http_tracing() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO))
}

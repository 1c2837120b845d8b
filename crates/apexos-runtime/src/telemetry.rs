//! Tracing and OpenTelemetry pipeline setup.
//!
//! Call [`init_tracing`] once at process startup, before any decision router
//! is constructed, and hold the returned guard until exit.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `APEXOS_LOG_FORMAT=json` | Emit newline-delimited JSON logs. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP collector base URL; when set, spans are exported over OTLP/HTTP. |
//!
//! # Example
//!
//! ```rust,no_run
//! let _guard = apexos_runtime::telemetry::init_tracing("apexos");
//! ```

use opentelemetry::{KeyValue, trace::TracerProvider as _};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Initialise the global `tracing` subscriber, with OTLP span export when
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set and plain console output otherwise.
///
/// The returned [`TracerProviderGuard`] must live as long as the process;
/// dropping it flushes pending span batches.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let default_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let use_json = std::env::var("APEXOS_LOG_FORMAT").as_deref() == Ok("json");

    let provider = build_provider(service_name);

    match (&provider, use_json) {
        (Some(p), true) => {
            let otel_layer = tracing_opentelemetry::layer().with_tracer(p.tracer("apexos"));
            tracing_subscriber::registry()
                .with(env_filter)
                .with(otel_layer)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        (Some(p), false) => {
            let otel_layer = tracing_opentelemetry::layer().with_tracer(p.tracer("apexos"));
            tracing_subscriber::registry()
                .with(env_filter)
                .with(otel_layer)
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        }
        (None, true) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        (None, false) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        }
    }

    TracerProviderGuard(provider)
}

// ─────────────────────────────────────────────────────────────────────────────
// RAII guard
// ─────────────────────────────────────────────────────────────────────────────

/// Shuts down the OTel [`SdkTracerProvider`] on drop, flushing pending
/// spans. Hold an instance in `main` for the whole program lifetime.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("[apexos] OpenTelemetry provider shutdown error: {e}");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Build the tracer provider when an OTLP endpoint is configured; `None`
/// when the env-var is absent, not an http(s) URL, or the exporter fails to
/// initialise (the caller falls back to console-only output).
fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;
    let endpoint = endpoint.trim();
    // The exporter speaks OTLP/HTTP; a gRPC or garbage endpoint would fail
    // at export time with no spans delivered, so reject it up front.
    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        eprintln!("[apexos] OTEL_EXPORTER_OTLP_ENDPOINT is not an http(s) URL; span export disabled");
        return None;
    }

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("[apexos] OTLP exporter init failed: {e}");
            return None;
        }
    };

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .with_attribute(KeyValue::new("service.namespace", "apexos"))
        .build();

    // Simple (synchronous) exporter: no async runtime exists at init time.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

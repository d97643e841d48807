//! Logging and distributed tracing setup
//!
//! Console logs always go through `tracing-subscriber` with an `EnvFilter`
//! (`RUST_LOG`, default `info,reactbox=debug`). When an OTLP endpoint is
//! configured, spans are also exported through OpenTelemetry:
//!
//! ```text
//! reactbox ─┬─► stderr (fmt or JSON)
//!           └─► OTLP (gRPC) → collector → trace backend
//!                 agent_run
//!                   ├── llm_call
//!                   └── tool_call
//! ```

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,reactbox=debug";

pub type InitError = Box<dyn std::error::Error + Send + Sync>;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn otlp_tracer(service_name: &str, endpoint: &str) -> Result<sdktrace::Tracer, InitError> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint);

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(sdktrace::Config::default().with_resource(Resource::new(vec![
            KeyValue::new("service.name", service_name.to_string()),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])))
        .install_batch(runtime::Tokio)?;

    Ok(tracer)
}

/// Initialize console logging, plus OTLP span export when `otlp_endpoint` is set
///
/// Must be called from inside a Tokio runtime when exporting.
///
/// # Example
/// ```ignore
/// reactbox::tracing::init_tracing("reactbox", None)?;
/// ```
pub fn init_tracing(service_name: &str, otlp_endpoint: Option<&str>) -> Result<(), InitError> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);

    match otlp_endpoint {
        Some(endpoint) => {
            let tracer = otlp_tracer(service_name, endpoint)?;
            tracing_subscriber::registry()
                .with(env_filter())
                .with(fmt_layer)
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()?;
            tracing::info!(
                service = service_name,
                endpoint = endpoint,
                "OpenTelemetry tracing initialized"
            );
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(fmt_layer)
                .try_init()?;
        }
    }

    Ok(())
}

/// JSON logs on stderr, for log shippers
pub fn init_tracing_json() -> Result<(), InitError> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(std::io::stderr),
        )
        .try_init()?;
    Ok(())
}

/// Flush pending spans; harmless when OTLP export was never enabled
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}

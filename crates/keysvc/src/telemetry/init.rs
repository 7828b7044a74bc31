//! OTEL SDK initialisation: tracing subscriber + optional OTLP exporter.

use anyhow::{Context, Result};
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialise the global tracing subscriber and, when an OTLP endpoint is
/// configured, the OTEL export pipeline.
///
/// Configures:
/// - A JSON-formatted [`tracing_subscriber`] layer for structured log output.
/// - A [`tracing_opentelemetry`] layer that exports spans to the OTLP
///   endpoint, when one is given.
///
/// # Errors
///
/// Returns an error if the OTLP exporter or SDK pipeline cannot be
/// initialised, or if a subscriber is already installed.
pub fn init_telemetry(otlp_endpoint: Option<&str>, log_level: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json());

    match otlp_endpoint {
        Some(endpoint) => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(endpoint),
                )
                .with_trace_config(
                    opentelemetry_sdk::trace::Config::default().with_resource(service_resource()),
                )
                .install_batch(runtime::Tokio)
                .context("failed to install OTLP tracing pipeline")?;

            registry
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()
                .context("failed to initialise tracing subscriber")?;
        }
        None => {
            registry
                .try_init()
                .context("failed to initialise tracing subscriber")?;
        }
    }

    Ok(())
}

fn service_resource() -> Resource {
    Resource::new(vec![
        KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_NAME,
            "cas-keysvc",
        ),
        KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
            env!("CARGO_PKG_VERSION"),
        ),
    ])
}

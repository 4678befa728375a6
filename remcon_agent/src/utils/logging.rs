//! # Logging
//!
//! [`init_logging`] installs the global `tracing` subscriber once per process:
//!
//! - the filter comes from `RUST_LOG`, or `<level>,remcon_agent=debug` when unset;
//! - with `log_to_file`, output goes to a daily rolling `remcon_agent.log` in the
//!   user's cache directory (no ANSI colors);
//! - otherwise, or when that directory is not writable, output goes to stderr with
//!   colors.
//!
//! With the `opentelemetry` feature, spans are also exported over OTLP when
//! `OTEL_EXPORTER_OTLP_ENDPOINT` or `REMCON_TRACING` is set.

use anyhow::Result;
use directories::ProjectDirs;
#[cfg(feature = "opentelemetry")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "opentelemetry")]
use opentelemetry_otlp::WithExportConfig;
#[cfg(feature = "opentelemetry")]
use opentelemetry_sdk::{
    Resource,
    trace::{self as sdktrace, SdkTracerProvider},
};
use std::{
    io::stderr,
    path::{Path, PathBuf},
    sync::Once,
};
use tracing_subscriber::{EnvFilter, fmt::layer, prelude::*};

const LOG_FILE_NAME: &str = "remcon_agent.log";

static INIT: Once = Once::new();

/// Trace-level stderr logging for tests.
pub fn init_test_logging() {
    let _ = init_logging("trace", false);
}

/// Directory used for log files, if the platform defines one.
pub fn log_directory() -> Option<PathBuf> {
    ProjectDirs::from("com", "Remcon", "remcon_agent").map(|dirs| dirs.cache_dir().to_path_buf())
}

fn default_directives(log_level: &str) -> String {
    format!("{log_level},remcon_agent=debug")
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging(log_level: &str, log_to_file: bool) -> Result<()> {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directives(log_level)));

        if log_to_file
            && let Some(log_dir) = log_directory()
            && is_writable_dir(&log_dir)
        {
            // rolling::daily panics instead of returning an error on some I/O failures.
            let appender = std::panic::catch_unwind(|| {
                tracing_appender::rolling::daily(&log_dir, LOG_FILE_NAME)
            });
            if let Ok(appender) = appender {
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let subscriber = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer().with_writer(writer).with_ansi(false));

                #[cfg(feature = "opentelemetry")]
                let subscriber = subscriber.with(init_otel());

                subscriber.init();
                // Dropping the guard would stop the background writer.
                std::mem::forget(guard);
                return;
            }
        }

        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(layer().with_writer(stderr).with_ansi(true));

        #[cfg(feature = "opentelemetry")]
        let subscriber = subscriber.with(init_otel());

        subscriber.init();
    });

    Ok(())
}

#[cfg(feature = "opentelemetry")]
fn init_otel<S>() -> Option<tracing_opentelemetry::OpenTelemetryLayer<S, sdktrace::Tracer>>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();
    if endpoint.is_none() && std::env::var("REMCON_TRACING").is_err() {
        return None;
    }

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint.unwrap_or_else(|| "http://localhost:4318/v1/traces".to_string()))
        .build()
        .ok()?;

    let provider = SdkTracerProvider::builder()
        .with_resource(Resource::builder().with_service_name("remcon_agent").build())
        .with_batch_exporter(exporter)
        .build();

    Some(tracing_opentelemetry::layer().with_tracer(provider.tracer("remcon_agent")))
}

/// Create `dir` if needed and check that a file can be written in it.
fn is_writable_dir(dir: &Path) -> bool {
    if std::fs::create_dir_all(dir).is_err() {
        return false;
    }
    let probe = dir.join(".remcon_log_probe");
    let writable = std::fs::write(&probe, b"probe").is_ok();
    let _ = std::fs::remove_file(&probe);
    writable
}

use std::io;
use std::sync::Once;

use changefeed_config::Environment;
use thiserror::Error;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::log::SetLoggerError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Directive used when `RUST_LOG` is not set.
const DEFAULT_LOG_DIRECTIVE: &str = "info";

/// Directory where production logs are rolled.
const LOGS_DIR: &str = "logs";

/// Environment variable that turns on log output in tests.
const ENABLE_TRACING_ENV_NAME: &str = "ENABLE_TRACING";

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to determine the runtime environment: {0}")]
    Environment(#[source] io::Error),
    #[error("failed to install the log bridge: {0}")]
    LogBridge(#[from] SetLoggerError),
    #[error("failed to install the global subscriber: {0}")]
    Subscriber(#[from] SetGlobalDefaultError),
}

/// Keeps the non-blocking log writer alive.
///
/// Dropping it flushes buffered lines, so it must be held until the process exits.
#[must_use = "dropping the flusher stops file logging"]
pub struct LogFlusher {
    _guard: Option<WorkerGuard>,
}

/// Installs the global tracing subscriber for a service named `app_name`.
///
/// In `dev` logs are human readable on stdout. In `prod` they are JSON on stdout and also
/// written to a daily rolling file under `logs/`. Records emitted through the `log` crate
/// (librdkafka's logger among them) are forwarded to tracing.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    let environment = Environment::load().map_err(TracingError::Environment)?;

    tracing_log::LogTracer::init()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVE));

    let (pretty_layer, json_layers, guard) = if environment.is_prod() {
        let file_appender =
            tracing_appender::rolling::daily(LOGS_DIR, format!("{app_name}.log"));
        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

        let stdout_layer = fmt::layer().json().with_current_span(true);
        let file_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(file_writer);

        (None, Some(stdout_layer.and_then(file_layer)), Some(guard))
    } else {
        (Some(fmt::layer().with_target(true)), None, None)
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(pretty_layer)
        .with(json_layers);
    tracing::subscriber::set_global_default(subscriber)?;

    tracing::info!(app_name, environment = %environment, "tracing initialized");

    Ok(LogFlusher { _guard: guard })
}

/// Installs a test subscriber once per process when `ENABLE_TRACING` is set.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        if std::env::var(ENABLE_TRACING_ENV_NAME).is_err() {
            return;
        }

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVE));
        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

use std::backtrace::BacktraceStatus;
use std::sync::Arc;

use changefeed::error::IndexerError;
use changefeed_config::Environment;
use changefeed_config::shared::IndexerConfig;
use secrecy::ExposeSecret;
use sentry::protocol::{Event, Exception, Stacktrace};
use sentry::types::Uuid;
use tracing::info;

use crate::APP_VERSION_ENV_NAME;
use crate::error::{IndexerServiceError, IndexerServiceResult};

/// Initializes Sentry when `sentry.dsn` is configured.
///
/// Panics are captured and every event is tagged with `service=indexer` plus the version found
/// in the environment.
pub fn init(config: &IndexerConfig) -> IndexerServiceResult<Option<sentry::ClientInitGuard>> {
    let Some(sentry_config) = &config.sentry else {
        info!("sentry not configured for the indexer, skipping initialization");

        return Ok(None);
    };

    info!("initializing sentry with supplied dsn");

    let environment = Environment::load().map_err(IndexerServiceError::config)?;
    let dsn = sentry_config
        .dsn
        .expose_secret()
        .parse()
        .map_err(IndexerServiceError::config)?;

    let guard = sentry::init(sentry::ClientOptions {
        dsn: Some(dsn),
        environment: Some(environment.to_string().into()),
        integrations: vec![Arc::new(
            sentry::integrations::panic::PanicIntegration::new(),
        )],
        attach_stacktrace: true,
        ..Default::default()
    });

    let version = std::env::var(APP_VERSION_ENV_NAME);
    sentry::configure_scope(|scope| {
        scope.set_tag("service", "indexer");
        if let Ok(version) = version {
            scope.set_tag("version", version);
        }
    });

    Ok(Some(guard))
}

/// Captures `err` and returns the id of the Sentry event.
pub fn capture_error(err: &IndexerServiceError) -> Uuid {
    sentry::capture_event(event_from_error(err))
}

fn event_from_error(err: &IndexerServiceError) -> Event<'static> {
    let mut exceptions = Vec::new();

    match err.as_indexer_error() {
        // Aggregated errors are independent failures, they keep their order.
        Some(indexer_err) => collect_indexer_exceptions(indexer_err, &mut exceptions),
        None => {
            let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
            while let Some(e) = current {
                exceptions.push(Exception {
                    ty: err.category().to_owned(),
                    value: Some(e.to_string()),
                    ..Default::default()
                });
                current = e.source();
            }
            // Root cause first.
            exceptions.reverse();
        }
    }

    if let Some(stacktrace) = captured_stacktrace(err)
        && let Some(exception) = exceptions.first_mut()
    {
        exception.stacktrace = Some(stacktrace);
    }

    Event {
        exception: exceptions.into(),
        level: sentry::Level::Error,
        ..Default::default()
    }
}

fn collect_indexer_exceptions(error: &IndexerError, exceptions: &mut Vec<Exception>) {
    match error.errors() {
        Some(errors) => {
            for error in errors {
                collect_indexer_exceptions(error, exceptions);
            }
        }
        None => exceptions.push(Exception {
            ty: format!("{:?}", error.kind()),
            value: Some(error.to_string()),
            ..Default::default()
        }),
    }
}

fn captured_stacktrace(err: &IndexerServiceError) -> Option<Stacktrace> {
    let backtrace = err.backtrace()?;
    if backtrace.status() != BacktraceStatus::Captured {
        return None;
    }

    sentry::integrations::backtrace::parse_stacktrace(&backtrace.to_string())
}

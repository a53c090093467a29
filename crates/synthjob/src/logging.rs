//! Construction of the tracing subscriber.
//!
//! The host builds one [`Dispatch`] at start-up and hands it to every
//! thread it spawns; nothing in this crate installs a global subscriber.

use tracing::Dispatch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::ConfigError;

/// Builds a dispatch from the logging configuration. Filter precedence:
/// `logging.filter`, then `RUST_LOG`, then `debug`/`info` from the flag.
pub fn build_dispatch(config: &LoggingConfig) -> Result<Dispatch, ConfigError> {
    let filter = match config.filter {
        Some(ref directives) => {
            EnvFilter::try_new(directives).map_err(|e| ConfigError::LogFilter {
                filter: directives.clone(),
                reason: e.to_string(),
            })?
        }
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(if config.debug { "debug" } else { "info" })
        }),
    };

    let registry = tracing_subscriber::registry().with(filter);
    let dispatch = if config.json {
        Dispatch::new(
            registry.with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            ),
        )
    } else {
        Dispatch::new(
            registry.with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_writer(std::io::stderr),
            ),
        )
    };
    Ok(dispatch)
}

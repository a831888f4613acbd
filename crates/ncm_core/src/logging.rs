//! Logging setup
//!
//! The manager logs through `tracing`. Binaries that embed it call
//! [`init_logging`] once to install a formatter; libraries and tests that
//! install their own subscriber can skip it.

use crate::config::LoggingConfig;
use crate::error::{NcmError, NcmResult};

/// Install the global `tracing` subscriber described by `config`.
///
/// Fails with `FailedPrecondition` if a global subscriber is already set.
#[cfg(feature = "logging")]
pub fn init_logging(config: &LoggingConfig) -> NcmResult<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_new(&config.level)
        .map_err(|e| NcmError::invalid_parameter(format!("log level {:?}: {e}", config.level)))?;

    let builder = fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi)
        .with_thread_names(true)
        .with_target(true);

    #[cfg(feature = "logging-json")]
    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    #[cfg(not(feature = "logging-json"))]
    let result = builder.try_init();

    result.map_err(|e| NcmError::FailedPrecondition(format!("logging already initialized: {e}")))
}

/// Without the `logging` feature there is no formatter to install.
#[cfg(not(feature = "logging"))]
pub fn init_logging(config: &LoggingConfig) -> NcmResult<()> {
    if config.level.is_empty() {
        return Err(NcmError::invalid_parameter("empty log level"));
    }
    Ok(())
}

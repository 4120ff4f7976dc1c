//! Logging setup for embedders of the engine.
//!
//! The library itself only emits `tracing` events. Binaries and test harnesses
//! call [`init_logging`] once to install a subscriber. Engines log the number of
//! metrics computed per compute domain at DEBUG level, so a verbosity of 1 is
//! enough to observe aggregate bundling.

use crate::Result;
use tracing_subscriber::EnvFilter;

/// Output format for the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single-line output
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Maps CLI-style verbosity flags to a tracing level.
///
/// `quiet` wins over any verbosity; otherwise 0=INFO, 1=DEBUG, 2+=TRACE.
pub fn level_for(verbose: u8, quiet: bool) -> tracing::Level {
    match (quiet, verbose) {
        (true, _) => tracing::Level::ERROR,
        (false, 0) => tracing::Level::INFO,
        (false, 1) => tracing::Level::DEBUG,
        (false, _) => tracing::Level::TRACE,
    }
}

/// Initializes structured text logging based on verbosity level.
///
/// # Example
/// ```rust,no_run
/// use dqverify_core::logging::init_logging;
///
/// // DEBUG shows the per-domain bundling summaries
/// init_logging(1, false).expect("Failed to initialize logging");
/// ```
pub fn init_logging(verbose: u8, quiet: bool) -> Result<()> {
    init_logging_with_format(verbose, quiet, LogFormat::Text)
}

/// Initializes logging with an explicit output format.
///
/// `RUST_LOG` takes precedence over the verbosity flags when it is set.
/// Fails with a configuration error if a global subscriber is already installed.
pub fn init_logging_with_format(verbose: u8, quiet: bool, format: LogFormat) -> Result<()> {
    let level = level_for(verbose, quiet);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    installed.map_err(|e| {
        crate::error::ExpectationsError::configuration(format!(
            "Failed to initialize logging: {}",
            e
        ))
    })
}

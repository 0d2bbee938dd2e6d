//! Logging setup for kickride.
//!
//! Every engine component logs through `tracing`; this module installs the
//! subscriber used by the `kickride` binary. Degraded ingestion (skipped risk
//! events, failed kickboard releases, exhausted side tasks) is reported at
//! `warn`/`error`, so the `Quiet` level still surfaces it to operators.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Crate target used for the default filter directive.
const LOG_TARGET: &str = "kickride";

/// Verbosity level for logging output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Ride lifecycle and admin events (info and above).
    #[default]
    Normal,
    /// Per-event ingestion and storage detail (debug and above).
    Verbose,
    /// Everything.
    Trace,
}

impl Verbosity {
    /// Convert verbosity to a tracing level.
    #[must_use]
    pub fn to_level_filter(&self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// Build the default `EnvFilter` directive for this verbosity.
    #[must_use]
    pub fn directive(&self) -> String {
        format!("{LOG_TARGET}={}", self.to_level_filter())
    }
}

/// Initialize the logging system.
///
/// Call once at startup. `RUST_LOG` takes precedence over `verbosity`.
///
/// # Examples
///
/// ```no_run
/// use kickride::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::Verbose);
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    );

    // A subscriber may already be installed (tests, embedding hosts).
    let _ = subscriber.try_init();
}

/// Initialize logging for tests, keeping output to warnings and errors.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

//! Error types for the watchdog.

use thiserror::Error;

/// A specialised Result type for watchdog operations.
pub type Result<T> = std::result::Result<T, WatchdogError>;

/// Errors that can occur while setting up the watchdog.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum WatchdogError {
    /// Configuration error.
    #[error("configuration error")]
    Config(#[source] Box<figment::Error>),
}

impl From<figment::Error> for WatchdogError {
    fn from(err: figment::Error) -> Self {
        WatchdogError::Config(Box::new(err))
    }
}

/// Failure reported by a [`Reporter`](crate::Reporter) when acknowledging a report.
///
/// Reporter failures never fail an invocation. They end the wait for
/// acknowledgement and are logged.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReporterError {
    /// The reporter could not deliver the report.
    #[error("report failed: {0}")]
    Failed(String),

    /// The reporter dropped the acknowledger without completing it.
    #[error("reporter dropped the acknowledgement")]
    Dropped,
}

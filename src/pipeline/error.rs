//! Error types and reporting for pipeline stages.

use crate::error::TalkbackError;
use std::fmt;

/// Errors that can occur while a stage processes an item.
#[derive(Debug, Clone)]
pub enum StationError {
    /// The item is dropped; the stage keeps running.
    Recoverable(String),
    /// The stage stops, which ends the session.
    Fatal(String),
}

impl StationError {
    /// The session's client is gone; nothing downstream can be delivered.
    pub fn disconnected() -> Self {
        StationError::Fatal("client disconnected".to_string())
    }

    /// A downstream stage has stopped.
    pub fn queue_closed(queue: &str) -> Self {
        StationError::Fatal(format!("{queue} queue closed"))
    }
}

impl fmt::Display for StationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationError::Recoverable(msg) => write!(f, "Recoverable error: {}", msg),
            StationError::Fatal(msg) => write!(f, "Fatal error: {}", msg),
        }
    }
}

impl std::error::Error for StationError {}

impl From<TalkbackError> for StationError {
    fn from(err: TalkbackError) -> Self {
        StationError::Recoverable(err.to_string())
    }
}

/// Trait for reporting stage errors.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, stage: &str, error: &StationError);
}

/// Reporter that logs through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, stage: &str, error: &StationError) {
        match error {
            StationError::Recoverable(msg) => tracing::warn!(stage, "{}", msg),
            StationError::Fatal(msg) => tracing::error!(stage, "{}", msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_error_display() {
        let recoverable = StationError::Recoverable("temporary failure".to_string());
        assert_eq!(
            recoverable.to_string(),
            "Recoverable error: temporary failure"
        );

        let fatal = StationError::Fatal("critical failure".to_string());
        assert_eq!(fatal.to_string(), "Fatal error: critical failure");
    }

    #[test]
    fn test_backend_errors_are_recoverable() {
        let err: StationError = TalkbackError::Timeout {
            operation: "final transcription".to_string(),
            after_ms: 7000,
        }
        .into();

        assert!(matches!(err, StationError::Recoverable(_)));
    }

    #[test]
    fn test_disconnect_is_fatal() {
        assert!(matches!(
            StationError::disconnected(),
            StationError::Fatal(_)
        ));
        assert_eq!(
            StationError::queue_closed("synthesis").to_string(),
            "Fatal error: synthesis queue closed"
        );
    }

    #[test]
    fn test_log_reporter() {
        let reporter = LogReporter;
        // Just ensure it doesn't panic
        reporter.report("generation", &StationError::Recoverable("test error".to_string()));
        reporter.report("generation", &StationError::Fatal("test error".to_string()));
    }
}

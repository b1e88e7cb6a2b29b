use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::session::SessionState;

/// Result alias for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Errors that can occur while starting, driving or observing the managed service.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("service already started (session is {0})")]
    AlreadyStarted(SessionState),
    #[error("service not running (session is {0})")]
    NotRunning(SessionState),
    #[error("session was never started")]
    NotStarted,
    #[error("session configuration is frozen while the session is {0}")]
    ConfigFrozen(SessionState),
    #[error("missing {marker:?} log message within {} milliseconds", .timeout.as_millis())]
    StartupTimeout { marker: String, timeout: Duration },
    #[error("service did not enter its main loop within {} milliseconds", .0.as_millis())]
    MainLoopTimeout(Duration),
    #[error("service did not stop within {} milliseconds", .0.as_millis())]
    ShutdownTimeout(Duration),
    #[error("{message} (waited {} milliseconds)", .timeout.as_millis())]
    LogTimeout { message: String, timeout: Duration },
    #[error("startup marker observed but no service instance was installed")]
    ServiceUnavailable,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Unexpected(String),
}

impl HarnessError {
    pub(crate) fn log_timeout(message: impl Into<String>, timeout: Duration) -> Self {
        HarnessError::LogTimeout {
            message: message.into(),
            timeout,
        }
    }

    /// Build a free-form failure, typically from inside a criterion.
    pub fn unexpected(message: impl Into<String>) -> Self {
        HarnessError::Unexpected(message.into())
    }
}

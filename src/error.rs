use thiserror::Error;
use tracing::{error, warn};

/// Domain-specific errors for the shell.
#[derive(Error, Debug)]
pub enum ShellError {
    #[error("Failed to spawn '{interpreter}': {source}")]
    ProcessSpawn {
        interpreter: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to capture child {0} stream")]
    StreamCapture(&'static str),

    #[error("Window operation failed: {0}")]
    Window(String),
}

pub type Result<T> = std::result::Result<T, ShellError>;

/// Extension trait for silent error logging with caller location tracking.
/// Use when the operation is recoverable and the user doesn't need to know.
///
/// # Examples
///
/// ```ignore
/// use script_relay::error::ResultExt;
///
/// // Log and continue if the window can't be recreated
/// recreate_main_window(app).log_err();
/// ```
pub trait ResultExt<T> {
    /// Log error with caller location and return None. Use for recoverable failures.
    fn log_err(self) -> Option<T>;
    /// Log as warning with caller location and return None. Use for expected failures.
    fn warn_on_err(self) -> Option<T>;
}

impl<T, E: std::fmt::Debug> ResultExt<T> for std::result::Result<T, E> {
    #[track_caller]
    fn log_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(err) => {
                let caller = std::panic::Location::caller();
                error!(
                    error = ?err,
                    file = caller.file(),
                    line = caller.line(),
                    "Operation failed"
                );
                None
            }
        }
    }

    #[track_caller]
    fn warn_on_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(err) => {
                let caller = std::panic::Location::caller();
                warn!(
                    error = ?err,
                    file = caller.file(),
                    line = caller.line(),
                    "Operation had warning"
                );
                None
            }
        }
    }
}

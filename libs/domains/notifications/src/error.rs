//! Error types for completion notifications.

use thiserror::Error;

/// Result type for notification operations.
pub type NotificationResult<T> = Result<T, NotificationError>;

/// Errors from delivering a completion callback.
///
/// These never leave the notifier: `CompletionNotifier::notify` logs and
/// drops them.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// No answer within the configured timeout.
    #[error("Notification timed out after {0}s")]
    Timeout(u64),

    /// Endpoint answered with a non-2xx status.
    #[error("Notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Connection, DNS or TLS failure.
    #[error("Notification transport error: {0}")]
    Transport(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<reqwest::Error> for NotificationError {
    fn from(err: reqwest::Error) -> Self {
        NotificationError::Transport(err.to_string())
    }
}

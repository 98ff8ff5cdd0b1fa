use thiserror::Error;

/// Errors shared by the queue, object-store, and notification adapters.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl QueueError {
    /// Whether the condition is connectivity-shaped (pause and retry) rather
    /// than a hard rejection.
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Unavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConveyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown source: {key}")]
    UnknownSource { key: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConveyError {
    /// Short error code string for the error-log table and operator tooling.
    pub fn code(&self) -> &'static str {
        match self {
            ConveyError::Config(_) => "CONFIG_ERROR",
            ConveyError::UnknownSource { .. } => "UNKNOWN_SOURCE",
            ConveyError::Serialization(_) => "SERIALIZATION_ERROR",
            ConveyError::Io(_) => "IO_ERROR",
            ConveyError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ConveyError>;

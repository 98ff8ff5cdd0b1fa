use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Store error: {0}")]
    Store(#[from] convey_store::StoreError),

    #[error("Alert not found: {id}")]
    NotFound { id: String },

    #[error("Invalid transition for alert {id}: {detail}")]
    InvalidTransition { id: String, detail: String },

    #[error("Unknown metric: {metric_source}/{name}")]
    UnknownMetric { metric_source: String, name: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AlertError>;

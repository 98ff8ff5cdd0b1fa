use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Store error: {0}")]
    Store(#[from] convey_store::StoreError),

    #[error("Remote error: {0}")]
    Remote(#[from] convey_queue::QueueError),

    #[error("Recommendation not found or already processed: {id}")]
    NotFound { id: String },

    #[error("No call source configured in the catalog")]
    NoCallSource,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EvalError>;

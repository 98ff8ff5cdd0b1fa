use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Store error: {0}")]
    Store(#[from] convey_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] convey_queue::QueueError),

    #[error("Core error: {0}")]
    Core(#[from] convey_core::ConveyError),
}

impl PipelineError {
    /// Connectivity-shaped failures pause the loop instead of failing ids.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::Queue(e) if e.is_transient())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

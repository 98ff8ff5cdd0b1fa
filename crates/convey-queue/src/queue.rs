use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Acknowledgement returned by a successful send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    #[serde(rename = "messageId")]
    pub message_id: String,
}

/// A message pulled from a queue. `receipt` is the handle used to delete it;
/// an undeleted message becomes visible again after the visibility timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub receipt: String,
    pub body: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl QueueMessage {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Common interface for message-queue backends.
///
/// Implementations must be `Send + Sync`; the pipeline drives them from a
/// single task but shares the client between the dispatcher and ingestor.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Deliver one message with its string attributes.
    async fn send(
        &self,
        queue: &str,
        body: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<SendReceipt>;

    /// Long-poll for up to `max` messages, waiting at most `wait`.
    /// An empty vec is a normal outcome, not an error.
    async fn receive(&self, queue: &str, max: usize, wait: Duration) -> Result<Vec<QueueMessage>>;

    /// Delete a received message by its receipt handle.
    async fn delete(&self, queue: &str, receipt: &str) -> Result<()>;

    /// Cheap reachability check used for fatal-startup validation.
    async fn probe(&self, queue: &str) -> Result<()>;
}

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{QueueError, Result};
use crate::queue::{MessageQueue, QueueMessage, SendReceipt};

/// Overall request ceiling, above the 5 s long-poll wait with headroom.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// JSON-over-HTTP queue client.
///
/// Routes: `POST {base}/queues/{name}/messages` (send),
/// `POST {base}/queues/{name}/receive` (long poll),
/// `DELETE {base}/queues/{name}/messages/{receipt}`,
/// `GET {base}/queues/{name}` (probe).
pub struct HttpQueue {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpQueue {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            auth_token: auth_token.filter(|t| !t.is_empty()),
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

/// Surface connection errors as Unavailable so the engines pause and retry
/// instead of treating them as hard failures.
fn map_err(e: reqwest::Error) -> QueueError {
    if e.is_connect() || e.is_timeout() {
        QueueError::Unavailable(e.to_string())
    } else {
        QueueError::Http(e)
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status().as_u16();
    if !resp.status().is_success() {
        let message = resp.text().await.unwrap_or_default();
        warn!(status, body = %message, "queue API error");
        return Err(QueueError::Api { status, message });
    }
    Ok(resp)
}

#[async_trait]
impl MessageQueue for HttpQueue {
    async fn send(
        &self,
        queue: &str,
        body: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<SendReceipt> {
        let url = format!("{}/queues/{}/messages", self.base_url, queue);
        let payload = serde_json::json!({ "body": body, "attributes": attributes });

        debug!(queue = %queue, "sending message");
        let resp = self
            .request(self.client.post(&url))
            .json(&payload)
            .send()
            .await
            .map_err(map_err)?;
        let resp = check_status(resp).await?;

        let receipt: SendReceipt = resp
            .json()
            .await
            .map_err(|e| QueueError::Parse(e.to_string()))?;
        Ok(receipt)
    }

    async fn receive(&self, queue: &str, max: usize, wait: Duration) -> Result<Vec<QueueMessage>> {
        let url = format!("{}/queues/{}/receive", self.base_url, queue);
        let payload = serde_json::json!({
            "maxMessages": max,
            "waitTimeSeconds": wait.as_secs(),
        });

        let resp = self
            .request(self.client.post(&url))
            .json(&payload)
            .send()
            .await
            .map_err(map_err)?;
        let resp = check_status(resp).await?;

        let batch: ReceiveResponse = resp
            .json()
            .await
            .map_err(|e| QueueError::Parse(e.to_string()))?;
        if !batch.messages.is_empty() {
            debug!(queue = %queue, count = batch.messages.len(), "received messages");
        }
        Ok(batch.messages)
    }

    async fn delete(&self, queue: &str, receipt: &str) -> Result<()> {
        let url = format!("{}/queues/{}/messages/{}", self.base_url, queue, receipt);
        let resp = self
            .request(self.client.delete(&url))
            .send()
            .await
            .map_err(map_err)?;
        check_status(resp).await?;
        Ok(())
    }

    async fn probe(&self, queue: &str) -> Result<()> {
        let url = format!("{}/queues/{}", self.base_url, queue);
        let resp = self
            .request(self.client.get(&url))
            .send()
            .await
            .map_err(map_err)?;
        check_status(resp).await?;
        Ok(())
    }
}

// Queue API response types (private, deserialization only)

#[derive(Deserialize)]
struct ReceiveResponse {
    #[serde(default)]
    messages: Vec<QueueMessage>,
}

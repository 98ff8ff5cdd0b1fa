use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{QueueError, Result};

/// One-way signal channel toward the analytics service. No payload of
/// substance travels here; the service pulls configs from the object store.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, message: &Value) -> Result<()>;
}

/// HTTP notifier: `POST {channel_url}` with the JSON message as body.
pub struct HttpNotifier {
    client: reqwest::Client,
    channel_url: String,
    auth_token: Option<String>,
}

impl HttpNotifier {
    pub fn new(channel_url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            channel_url: channel_url.into(),
            auth_token: auth_token.filter(|t| !t.is_empty()),
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn publish(&self, message: &Value) -> Result<()> {
        let mut builder = self.client.post(&self.channel_url).json(message);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }

        let resp = builder.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                QueueError::Unavailable(e.to_string())
            } else {
                QueueError::Http(e)
            }
        })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            warn!(status, "notification publish failed");
            return Err(QueueError::SendFailed(message));
        }

        info!("notification published");
        Ok(())
    }
}

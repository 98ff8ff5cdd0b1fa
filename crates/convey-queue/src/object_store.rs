use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{QueueError, Result};

/// Read/write access to the remote JSON config artifacts.
///
/// The approval channel reads an artifact, mutates one field, and writes the
/// whole document back, so unknown fields must survive the round trip.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_json(&self, key: &str) -> Result<Value>;
    async fn put_json(&self, key: &str, value: &Value) -> Result<()>;
}

/// HTTP object store: `GET/PUT {base}/{bucket}/{key}`.
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
    auth_token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(
        base_url: impl Into<String>,
        bucket: impl Into<String>,
        auth_token: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            bucket: bucket.into(),
            auth_token: auth_token.filter(|t| !t.is_empty()),
        }
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.bucket, key)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn get_json(&self, key: &str) -> Result<Value> {
        let resp = self
            .request(self.client.get(self.url(key)))
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    QueueError::Unavailable(e.to_string())
                } else {
                    QueueError::Http(e)
                }
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            warn!(status, key = %key, "object store GET failed");
            return Err(QueueError::Api { status, message });
        }

        resp.json().await.map_err(|e| QueueError::Parse(e.to_string()))
    }

    async fn put_json(&self, key: &str, value: &Value) -> Result<()> {
        debug!(key = %key, "writing config artifact");
        let resp = self
            .request(self.client.put(self.url(key)))
            .json(value)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    QueueError::Unavailable(e.to_string())
                } else {
                    QueueError::Http(e)
                }
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            warn!(status, key = %key, "object store PUT failed");
            return Err(QueueError::Api { status, message });
        }
        Ok(())
    }
}

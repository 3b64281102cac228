//! Alert transport
//!
//! Delivers one alert per call. No retries; the caller only logs the outcome.

use super::types::AlertTask;
use crate::error::{Error, Result};
use std::time::Duration;

/// Outbound alert channel
#[async_trait::async_trait]
pub trait AlertTransport: Send + Sync {
    async fn send(&self, task: &AlertTask) -> Result<()>;

    /// Name used in logs
    fn channel_name(&self) -> &str;
}

/// JSON POST to a fixed endpoint
#[derive(Debug, Clone)]
pub struct HttpAlertTransport {
    url: String,
    client: reqwest::Client,
}

impl HttpAlertTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("alert client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl AlertTransport for HttpAlertTransport {
    async fn send(&self, task: &AlertTask) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&task.payload())
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            return Err(Error::Internal(format!(
                "alert endpoint returned {}",
                status
            )));
        }

        tracing::debug!(
            url = %self.url,
            camera = %task.display_name,
            class_id = task.class_id,
            status = %status,
            "Alert delivered"
        );

        Ok(())
    }

    fn channel_name(&self) -> &str {
        "http"
    }
}

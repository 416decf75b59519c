use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::info;

/// Downstream consumer for newly observed messages. Invoked once per
/// message, in arrival order; failures are the caller's to log, never to
/// escalate past the current message.
#[async_trait]
pub trait Speaker: Send + Sync {
    async fn speak(&self, text: &str) -> Result<()>;
}

/// Forwards text to the external translate-and-speak pipeline.
pub struct PipelineSpeaker {
    http: Client,
    url: String,
}

impl PipelineSpeaker {
    pub fn new(url: impl Into<String>) -> Self {
        Self { http: Client::new(), url: url.into() }
    }
}

#[async_trait]
impl Speaker for PipelineSpeaker {
    async fn speak(&self, text: &str) -> Result<()> {
        let resp = self.http.post(&self.url).json(&json!({ "text": text })).send().await?;
        let status = resp.status();
        if !status.is_success() {
            bail!("voice pipeline error {}: {}", status, resp.text().await.unwrap_or_default());
        }
        Ok(())
    }
}

/// Fallback when no pipeline endpoint is configured: surface the message in
/// the log stream.
pub struct ConsoleSpeaker;

#[async_trait]
impl Speaker for ConsoleSpeaker {
    async fn speak(&self, text: &str) -> Result<()> {
        info!(%text, "new message");
        Ok(())
    }
}

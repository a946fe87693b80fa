//! Webhook notification sink.
//!
//! Posts `{"content": "<mention>\n```<summary>```"}` to a chat webhook. The
//! content is clamped to the webhook's 2000-character limit by shortening the
//! summary, so the code fence always closes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use hype_core::error::HypeError;
use hype_core::notify::NotificationSink;
use serde_json::json;
use tracing::{debug, info};

/// Maximum `content` length accepted by the webhook.
pub const MAX_CONTENT_CHARS: usize = 2000;

/// Posted once when the monitor starts.
pub const STARTUP_MESSAGE: &str = "> Starting hype-monitor!";

/// Render the webhook `content` for a summary.
pub fn format_content(mention: Option<&str>, summary: &str) -> String {
    let head = mention.map(|m| format!("{m}\n")).unwrap_or_default();
    let overhead = head.chars().count() + 6;
    let budget = MAX_CONTENT_CHARS.saturating_sub(overhead);

    let body = if summary.chars().count() > budget {
        let mut cut: String = summary.chars().take(budget.saturating_sub(3)).collect();
        cut.push_str("...");
        cut
    } else {
        summary.to_string()
    };
    format!("{head}```{body}```")
}

pub struct WebhookSink {
    http: reqwest::Client,
    url: reqwest::Url,
    mention: Option<String>,
}

impl WebhookSink {
    /// Validate `url` (http/https only) and build the sink.
    pub fn new(url: &str, mention: Option<String>) -> Result<Self> {
        let url = url::Url::parse(url).map_err(|e| HypeError::Config(format!("webhook url {url:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(HypeError::Config(format!("webhook url must be http(s), got {}", url.scheme())).into());
        }
        Ok(Self { http: reqwest::Client::new(), url, mention })
    }

    /// Post `content` verbatim.
    pub async fn post_raw(&self, content: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.url.clone())
            .json(&json!({ "content": content }))
            .send()
            .await
            .context("webhook request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(HypeError::Notify(format!("webhook returned {status}: {body}")).into());
        }
        debug!("[webhook] delivered ({status})");
        Ok(())
    }

    pub async fn announce_startup(&self) -> Result<()> {
        info!("[webhook] {STARTUP_MESSAGE}");
        self.post_raw(STARTUP_MESSAGE).await
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn send(&self, message: &str) -> Result<()> {
        self.post_raw(&format_content(self.mention.as_deref(), message)).await
    }
}

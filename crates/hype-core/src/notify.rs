//! Outbound notification sinks.
//!
//! Hype events are rendered to a summary string (see the `Display` impl on
//! [`HypeEvent`](crate::types::HypeEvent)) and handed to a sink. Delivery is
//! fire-and-forget from the monitor's point of view: the caller spawns the
//! send and only logs failures.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Destination for human-readable hype summaries.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one message. Formatting limits (truncation etc.) are the
    /// sink's concern.
    async fn send(&self, message: &str) -> Result<()>;
}

/// Sink that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, message: &str) -> Result<()> {
        info!("[notify] {message}");
        Ok(())
    }
}

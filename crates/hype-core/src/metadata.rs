//! Stream metadata lookups (live flag, audience size).

use anyhow::Result;
use async_trait::async_trait;

use crate::types::StreamId;

/// Low-frequency source of per-stream metadata.
#[async_trait]
pub trait StreamMetadata: Send + Sync {
    /// Current viewer count, if the stream is live and the count is known.
    async fn viewer_count(&self, stream: &StreamId) -> Result<Option<u64>>;

    /// Whether the stream is currently live.
    async fn is_live(&self, stream: &StreamId) -> Result<bool>;
}

/// Metadata source for deployments without a status API: every stream is
/// live and audience size is unknown.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysLive;

#[async_trait]
impl StreamMetadata for AlwaysLive {
    async fn viewer_count(&self, _stream: &StreamId) -> Result<Option<u64>> {
        Ok(None)
    }

    async fn is_live(&self, _stream: &StreamId) -> Result<bool> {
        Ok(true)
    }
}

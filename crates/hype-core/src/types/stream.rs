//! Stream identity and the per-stream metadata the monitor keeps.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::HypeError;

/// Stable identifier of one monitored chat channel.
///
/// Always lower-case, trimmed, without the IRC `#` prefix, and never empty.
/// Construct through [`StreamId::new`] so invalid input is rejected at the
/// boundary and never reaches monitor state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamId(String);

impl StreamId {
    pub fn new(raw: &str) -> Result<Self, HypeError> {
        let name = raw.trim().trim_start_matches('#').trim().to_lowercase();
        if name.is_empty() {
            return Err(HypeError::InvalidInput(format!("empty stream identifier: {raw:?}")));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(HypeError::InvalidInput(format!("stream identifier contains whitespace: {raw:?}")));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StreamId {
    type Error = HypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<StreamId> for String {
    fn from(id: StreamId) -> Self {
        id.0
    }
}

/// Metadata for one monitored stream.
///
/// The live flag and `status_changed_at_ms` are mutated only by the
/// stream-status source; `viewers` by the metadata poller.
#[derive(Debug, Clone)]
pub struct Stream {
    pub id: StreamId,
    /// Human-readable name used in notifications (defaults to the id).
    pub display_name: String,
    pub live: bool,
    /// Epoch ms of the last live/offline transition (0 = never observed).
    pub status_changed_at_ms: u64,
    /// Current audience size, if known. Zero is treated as unknown.
    pub viewers: Option<u64>,
}

impl Stream {
    pub fn new(id: StreamId) -> Self {
        Self { display_name: id.as_str().to_string(), id, live: false, status_changed_at_ms: 0, viewers: None }
    }
}

/// Validate a raw viewer count coming from an external API.
///
/// Negative counts are rejected; zero maps to "unknown" so the rate falls back
/// to the raw per-second count.
pub fn viewer_count_from_raw(raw: i64) -> Result<Option<u64>, HypeError> {
    match raw {
        n if n < 0 => Err(HypeError::InvalidInput(format!("negative viewer count: {n}"))),
        0 => Ok(None),
        n => Ok(Some(n as u64)),
    }
}

/// An inbound chat message as delivered by the chat feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub stream: StreamId,
    pub author: String,
    pub text: String,
    /// Epoch ms at which the feed received the message.
    pub received_at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_id_normalizes() {
        let id = StreamId::new("  #Buddha ").unwrap();
        assert_eq!(id.as_str(), "buddha");
        assert_eq!(id.to_string(), "buddha");
    }

    #[test]
    fn stream_id_rejects_empty() {
        assert!(StreamId::new("").is_err());
        assert!(StreamId::new("  # ").is_err());
        assert!(StreamId::new("two words").is_err());
    }

    #[test]
    fn stream_id_deserializes_through_validation() {
        let id: StreamId = serde_json::from_str("\"VaeBen\"").unwrap();
        assert_eq!(id.as_str(), "vaeben");
        assert!(serde_json::from_str::<StreamId>("\"\"").is_err());
    }

    #[test]
    fn display_name_defaults_to_id() {
        let s = Stream::new(StreamId::new("Buddha").unwrap());
        assert_eq!(s.display_name, "buddha");
    }

    #[test]
    fn viewer_counts() {
        assert!(viewer_count_from_raw(-1).is_err());
        assert_eq!(viewer_count_from_raw(0).unwrap(), None);
        assert_eq!(viewer_count_from_raw(2000).unwrap(), Some(2000));
    }
}

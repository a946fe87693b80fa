//! Helix REST client for stream status and viewer counts.
//!
//! | Operation     | Method | Path                                   |
//! |---------------|--------|----------------------------------------|
//! | Live streams  | GET    | `/streams?user_login=a&user_login=b`   |
//!
//! Every request carries `Client-Id` and `Authorization: Bearer <token>`.
//! Only live streams appear in the response; absence means offline.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hype_core::metadata::StreamMetadata;
use hype_core::types::{StreamId, viewer_count_from_raw};
use serde::Deserialize;
use tracing::{debug, warn};

/// Logins per request accepted by the streams endpoint.
const MAX_LOGINS_PER_REQUEST: usize = 100;

#[derive(Debug, Deserialize)]
struct StreamsResponse {
    data: Vec<HelixStream>,
}

#[derive(Debug, Deserialize)]
struct HelixStream {
    user_login: String,
    #[serde(default)]
    user_name: String,
    #[serde(rename = "type", default)]
    kind: String,
    viewer_count: i64,
    started_at: DateTime<Utc>,
}

/// A live stream as reported by the status API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub stream: StreamId,
    /// Broadcaster name as shown on the channel, if reported.
    pub display_name: Option<String>,
    /// Epoch ms at which the broadcast started.
    pub started_at_ms: u64,
    pub viewers: Option<u64>,
}

impl HelixStream {
    fn into_info(self) -> Result<StreamInfo> {
        Ok(StreamInfo {
            stream: StreamId::new(&self.user_login)?,
            display_name: Some(self.user_name).filter(|n| !n.trim().is_empty()),
            started_at_ms: u64::try_from(self.started_at.timestamp_millis()).unwrap_or_default(),
            viewers: viewer_count_from_raw(self.viewer_count)?,
        })
    }
}

/// Parse a `/streams` response body. Entries that fail validation are
/// skipped with a warning.
pub fn parse_streams(body: &str) -> Result<Vec<StreamInfo>> {
    let resp: StreamsResponse = serde_json::from_str(body).context("malformed streams response")?;
    let mut out = Vec::with_capacity(resp.data.len());
    for s in resp.data {
        if !s.kind.is_empty() && s.kind != "live" {
            continue;
        }
        let login = s.user_login.clone();
        match s.into_info() {
            Ok(info) => out.push(info),
            Err(e) => warn!("[helix] skipping {login}: {e:#}"),
        }
    }
    Ok(out)
}

/// Source of live-stream snapshots for the status poller.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// The subset of `streams` that is currently live.
    async fn live_streams(&self, streams: &[StreamId]) -> Result<Vec<StreamInfo>>;
}

pub struct HelixClient {
    /// Shared HTTP client.
    http: reqwest::Client,
    client_id: String,
    access_token: String,
    /// REST base URL (e.g. `https://api.twitch.tv/helix`).
    base_url: String,
}

impl HelixClient {
    pub fn new(client_id: String, access_token: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            client_id,
            access_token,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch_chunk(&self, streams: &[StreamId]) -> Result<Vec<StreamInfo>> {
        let query: String = streams
            .iter()
            .map(|s| format!("user_login={}", urlencoding::encode(s.as_str())))
            .collect::<Vec<_>>()
            .join("&");
        let url = format!("{}/streams?{query}", self.base_url);

        let body = self
            .http
            .get(&url)
            .header("Client-Id", &self.client_id)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .context("streams request failed")?
            .error_for_status()
            .context("streams HTTP error")?
            .text()
            .await?;

        let live = parse_streams(&body)?;
        debug!("[helix] {} of {} streams live", live.len(), streams.len());
        Ok(live)
    }
}

#[async_trait]
impl StatusSource for HelixClient {
    async fn live_streams(&self, streams: &[StreamId]) -> Result<Vec<StreamInfo>> {
        let mut out = Vec::new();
        for chunk in streams.chunks(MAX_LOGINS_PER_REQUEST) {
            out.extend(self.fetch_chunk(chunk).await?);
        }
        Ok(out)
    }
}

#[async_trait]
impl StreamMetadata for HelixClient {
    async fn viewer_count(&self, stream: &StreamId) -> Result<Option<u64>> {
        let live = self.fetch_chunk(std::slice::from_ref(stream)).await?;
        Ok(live.into_iter().find(|s| &s.stream == stream).and_then(|s| s.viewers))
    }

    async fn is_live(&self, stream: &StreamId) -> Result<bool> {
        let live = self.fetch_chunk(std::slice::from_ref(stream)).await?;
        Ok(live.iter().any(|s| &s.stream == stream))
    }
}

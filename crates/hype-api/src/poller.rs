//! Periodic live-status and viewer-count polling.
//!
//! Each poll fetches the live subset of all monitored streams, compares it to
//! the last observed state and pushes transitions into the registry:
//!
//! ```text
//! offline/unknown ──live──► set_display_name, on_stream_online(started_at)
//! live            ──gone──► on_stream_offline
//! live            ──live──► set_viewer_count
//! ```
//!
//! A stream never seen live produces no offline transition.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use hype_core::registry::MonitorRegistry;
use hype_core::types::StreamId;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::helix::{StatusSource, StreamInfo};

/// A live-status transition observed by one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange {
    Online { stream: StreamId, started_at_ms: u64, display_name: Option<String> },
    Offline { stream: StreamId },
}

/// Transitions between the `previous` live flags and the current `live` set.
pub fn diff_status(previous: &HashMap<StreamId, bool>, streams: &[StreamId], live: &[StreamInfo]) -> Vec<StatusChange> {
    let mut changes = Vec::new();
    for id in streams {
        let was_live = previous.get(id).copied().unwrap_or(false);
        match (was_live, live.iter().find(|s| &s.stream == id)) {
            (false, Some(info)) => changes.push(StatusChange::Online {
                stream: id.clone(),
                started_at_ms: info.started_at_ms,
                display_name: info.display_name.clone(),
            }),
            (true, None) => changes.push(StatusChange::Offline { stream: id.clone() }),
            _ => {}
        }
    }
    changes
}

pub struct StatusPoller {
    source: Arc<dyn StatusSource>,
    registry: Arc<MonitorRegistry>,
    interval: Duration,
    live: HashMap<StreamId, bool>,
}

impl StatusPoller {
    pub fn new(source: Arc<dyn StatusSource>, registry: Arc<MonitorRegistry>, interval: Duration) -> Self {
        Self { source, registry, interval, live: HashMap::new() }
    }

    /// Run one poll and apply its transitions and viewer counts.
    pub async fn poll_once(&mut self) -> Result<Vec<StatusChange>> {
        let streams = self.registry.stream_ids().await;
        let live = self.source.live_streams(&streams).await?;
        let changes = diff_status(&self.live, &streams, &live);

        for change in &changes {
            match change {
                StatusChange::Online { stream, started_at_ms, display_name } => {
                    info!("[poller] {stream} went live");
                    if let Some(name) = display_name {
                        self.registry.set_display_name(stream, name).await?;
                    }
                    self.registry.on_stream_online(stream, *started_at_ms).await?;
                }
                StatusChange::Offline { stream } => {
                    info!("[poller] {stream} went offline");
                    self.registry.on_stream_offline(stream).await?;
                }
            }
        }

        for id in &streams {
            let info = live.iter().find(|s| &s.stream == id);
            self.live.insert(id.clone(), info.is_some());
            if let Some(info) = info {
                self.registry.set_viewer_count(id, info.viewers).await?;
            }
        }

        Ok(changes)
    }

    /// Poll forever on the configured interval. The first poll runs at once.
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(e) = self.poll_once().await {
                    warn!("[poller] status poll failed: {e:#}");
                }
            }
        })
    }
}

//! Sliding-window message rate for one stream.
//!
//! Messages are appended in arrival order. Each rate query drops everything
//! strictly older than `now - window` and counts the rest; a message stamped
//! exactly at the cutoff is still inside the window.

use std::collections::VecDeque;

use crate::config::DEFAULT_VIEWER_SCALE;

/// An observed chat message reduced to what the rate needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentMessage {
    /// Epoch ms.
    pub timestamp: u64,
    /// Lower-cased, trimmed text.
    pub text: String,
}

/// Trailing window of recent messages.
///
/// Not thread-safe; owned by a single [`StreamMonitor`](crate::monitor::StreamMonitor).
#[derive(Debug, Clone)]
pub struct RateWindow {
    messages: VecDeque<RecentMessage>,
    viewer_scale: f64,
}

impl RateWindow {
    pub fn new() -> Self {
        Self::with_viewer_scale(DEFAULT_VIEWER_SCALE)
    }

    /// Use `scale` as `K` in the per-viewer normalization.
    pub fn with_viewer_scale(scale: f64) -> Self {
        Self { messages: VecDeque::new(), viewer_scale: scale }
    }

    /// Append a message received at `now` (epoch ms).
    pub fn record(&mut self, text: &str, now: u64) {
        self.messages.push_back(RecentMessage { timestamp: now, text: text.trim().to_lowercase() });
    }

    /// Current rate over the trailing `window_secs`.
    ///
    /// Returns messages per second, or `count * K / (window_secs * viewers)`
    /// when a non-zero viewer count is supplied. Truncates the stored
    /// messages to those still inside the window.
    pub fn current_rate(&mut self, now: u64, window_secs: u64, viewers: Option<u64>) -> f64 {
        let count = self.retain_window(now, window_secs);
        let window = window_secs.max(1) as f64;
        match viewers {
            Some(v) if v > 0 => count as f64 * self.viewer_scale / (window * v as f64),
            _ => count as f64 / window,
        }
    }

    /// Drop messages older than the window and return how many remain.
    fn retain_window(&mut self, now: u64, window_secs: u64) -> usize {
        let cutoff = now.saturating_sub(window_secs * 1_000);
        while self.messages.front().is_some_and(|m| m.timestamp < cutoff) {
            self.messages.pop_front();
        }
        self.messages.len()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Most recent message, if any.
    pub fn last(&self) -> Option<&RecentMessage> {
        self.messages.back()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

impl Default for RateWindow {
    fn default() -> Self {
        Self::new()
    }
}

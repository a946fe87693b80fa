//! Per-stream activity monitor.
//!
//! [`StreamMonitor`] owns the [`RateWindow`], [`OrderStatistics`] and
//! [`HypeDetector`] of one stream and drives them from a periodic tick:
//!
//! ```text
//! on_message ──► RateWindow.record
//! tick(now)  ──► update gates ──► RateWindow.current_rate
//!                             ──► (can_store) OrderStatistics.insert + HypeDetector.evaluate
//!                             ──► (can_save, enough samples) FlushTicket for BaselineSync
//! online / offline ──► full reset
//! ```
//!
//! Two one-way gates withhold work until enough data exists:
//! - `can_store` opens once a full window has elapsed since the first message
//!   after the last reset and the store cooldown since the last live-status
//!   change has passed.
//! - `can_save` opens once the (longer) save cooldown has passed; flushes are
//!   only requested while it is open.
//!
//! The monitor is synchronous and not thread-safe. The registry wraps each one
//! in a [`SharedMonitor`] so ticks, messages and flushes are serialized.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::MonitorSettings;
use crate::detector::{HypeDetector, HypePhase};
use crate::order_stats::OrderStatistics;
use crate::rate_window::RateWindow;
use crate::types::{HypeEvent, Stream, StreamId};

/// A monitor behind the per-stream exclusive lock.
pub type SharedMonitor = Arc<tokio::sync::Mutex<StreamMonitor>>;

/// Permission to flush, tied to the monitor generation it was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushTicket {
    pub generation: u64,
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// Activity sample computed this tick.
    pub rate: f64,
    /// Whether the sample was added to the order statistics.
    pub stored: bool,
    /// Threshold the sample was evaluated against.
    pub threshold: Option<f64>,
    /// Hype transition caused by this tick.
    pub event: Option<HypeEvent>,
    /// Set when a background flush should be started.
    pub flush: Option<FlushTicket>,
}

/// Point-in-time view of a monitor, for status commands and logs.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorStatus {
    pub stream: StreamId,
    pub live: bool,
    pub viewers: Option<u64>,
    pub phase: HypePhase,
    pub threshold: Option<f64>,
    pub held_samples: usize,
    pub count: u64,
    pub min: Option<f64>,
    pub avg: Option<f64>,
    pub max: Option<f64>,
    pub can_store: bool,
    pub can_save: bool,
}

pub struct StreamMonitor {
    stream: Stream,
    settings: Arc<MonitorSettings>,
    window: RateWindow,
    stats: OrderStatistics,
    detector: HypeDetector,
    /// Durable baseline value at the hype percentile, if one exists.
    baseline_threshold: Option<f64>,
    /// Epoch ms of the first message since the last reset.
    start_tick_ms: Option<u64>,
    can_store: bool,
    can_save: bool,
    flush_in_flight: bool,
    /// Bumped on every reset; stale flushes compare against it.
    generation: u64,
}

impl StreamMonitor {
    pub fn new(stream: Stream, settings: Arc<MonitorSettings>) -> Self {
        let window = RateWindow::with_viewer_scale(settings.viewer_scale);
        let detector = HypeDetector::new(stream.id.clone(), settings.window_ms());
        Self {
            stream,
            settings,
            window,
            stats: OrderStatistics::new(),
            detector,
            baseline_threshold: None,
            start_tick_ms: None,
            can_store: false,
            can_save: false,
            flush_in_flight: false,
            generation: 0,
        }
    }

    pub fn id(&self) -> &StreamId {
        &self.stream.id
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    pub fn set_display_name(&mut self, name: impl Into<String>) {
        self.stream.display_name = name.into();
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> HypePhase {
        self.detector.phase()
    }

    pub fn stats(&self) -> &OrderStatistics {
        &self.stats
    }

    pub fn window(&self) -> &RateWindow {
        &self.window
    }

    /// Record an inbound chat message. Ignored while the stream is offline.
    pub fn on_message(&mut self, text: &str, received_at_ms: u64) -> bool {
        if !self.stream.live {
            return false;
        }
        self.window.record(text, received_at_ms);
        self.start_tick_ms.get_or_insert(received_at_ms);
        true
    }

    pub fn set_viewers(&mut self, viewers: Option<u64>) {
        self.stream.viewers = viewers.filter(|&v| v > 0);
    }

    pub fn set_baseline_threshold(&mut self, threshold: Option<f64>) {
        self.baseline_threshold = threshold;
    }

    pub fn baseline_threshold(&self) -> Option<f64> {
        self.baseline_threshold
    }

    /// Threshold used for evaluation: the durable baseline if known, else the
    /// in-memory percentile once enough samples exist (when enabled).
    pub fn threshold(&self) -> Option<f64> {
        self.baseline_threshold.or_else(|| {
            let min = self.settings.live_threshold_min_samples?;
            if self.stats.len() >= min.max(1) {
                self.stats.percentile(self.settings.hype_percentile.as_f64())
            } else {
                None
            }
        })
    }

    /// Advance one monitoring tick at `now` (epoch ms).
    pub fn tick(&mut self, now: u64) -> TickReport {
        self.update_gates(now);

        let viewers = if self.settings.normalize_by_viewers { self.stream.viewers } else { None };
        let rate = self.window.current_rate(now, self.settings.window_secs, viewers);
        let threshold = self.threshold();

        let mut stored = false;
        let mut event = None;
        if self.can_store {
            if rate > 0.0 {
                self.stats.insert(rate);
                stored = true;
            }
            event = self.detector.evaluate(threshold, rate, now);
        }

        let mut flush = None;
        if self.can_save && !self.flush_in_flight && self.stats.len() >= self.settings.flush_min_samples {
            self.flush_in_flight = true;
            flush = Some(FlushTicket { generation: self.generation });
        }

        if rate > 0.0 {
            debug!(
                "[{}] n={:09} activity={rate:05.2} hype={} threshold={} min={} avg={} peak={}",
                self.stream.id,
                self.stats.count(),
                self.detector.phase() == HypePhase::Hype,
                fmt_opt(threshold),
                fmt_opt(self.stats.min()),
                fmt_opt(self.stats.avg()),
                fmt_opt(self.stats.max()),
            );
        }

        TickReport { rate, stored, threshold, event, flush }
    }

    fn update_gates(&mut self, now: u64) {
        let since_status = now.saturating_sub(self.stream.status_changed_at_ms);

        let window_elapsed = self.start_tick_ms.is_some_and(|start| now.saturating_sub(start) >= self.settings.window_ms());
        if !self.can_store && window_elapsed && since_status > self.settings.store_cooldown_ms {
            self.can_store = true;
            info!("[{}] now storing activity and checking for hype", self.stream.id);
        }

        if !self.can_save && self.stream.live && since_status > self.settings.save_cooldown_ms {
            self.can_save = true;
            info!("[{}] baseline flushes enabled", self.stream.id);
        }
    }

    /// Take the held samples for a flush issued under `generation`.
    ///
    /// Returns `None` (and releases the flush slot) if the monitor was reset
    /// since, or if too few samples remain.
    pub fn take_flush_snapshot(&mut self, generation: u64) -> Option<Vec<f64>> {
        if generation != self.generation || self.stats.len() < self.settings.flush_min_samples {
            self.finish_flush(generation);
            return None;
        }
        Some(self.stats.flush_and_clear())
    }

    /// Put back a snapshot whose flush failed.
    pub fn restore_flush_snapshot(&mut self, generation: u64, snapshot: Vec<f64>) {
        if generation == self.generation {
            self.stats.restore(snapshot);
        }
    }

    /// Release the flush slot taken by the ticket of `generation`.
    pub fn finish_flush(&mut self, generation: u64) {
        if generation == self.generation {
            self.flush_in_flight = false;
        }
    }

    /// Stream came online at `started_at_ms` (epoch ms).
    pub fn on_online(&mut self, started_at_ms: u64) {
        self.reset();
        self.stream.live = true;
        self.stream.status_changed_at_ms = started_at_ms;
        info!("[{}] stream online", self.stream.id);
    }

    /// Stream went offline at `now` (epoch ms).
    pub fn on_offline(&mut self, now: u64) {
        self.stream.live = false;
        self.stream.status_changed_at_ms = now;
        self.reset();
        info!("[{}] stream offline", self.stream.id);
    }

    /// Clear all per-stream mutable state: messages, samples, open episode,
    /// gates and start tick. The held baseline threshold is kept.
    pub fn reset(&mut self) {
        self.window.clear();
        self.stats.reset();
        self.detector.reset();
        self.start_tick_ms = None;
        self.can_store = false;
        self.can_save = false;
        self.flush_in_flight = false;
        self.generation += 1;
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            stream: self.stream.id.clone(),
            live: self.stream.live,
            viewers: self.stream.viewers,
            phase: self.detector.phase(),
            threshold: self.threshold(),
            held_samples: self.stats.len(),
            count: self.stats.count(),
            min: self.stats.min(),
            avg: self.stats.avg(),
            max: self.stats.max(),
            can_store: self.can_store,
            can_save: self.can_save,
        }
    }
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map_or_else(|| "-".to_string(), |v| format!("{v:05.2}"))
}

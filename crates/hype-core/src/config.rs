//! Configuration parsing for the hype monitor.
//!
//! Everything is read from a single JSON file. Only `streams` is required;
//! every other section falls back to defaults through `effective_*` helpers.
//!
//! # Example config
//!
//! ```json
//! {
//!   "logging": { "module_name": "hype-monitor", "log_path": "/tmp/log" },
//!   "streams": ["buddha", "vaeben"],
//!   "monitor": { "window_secs": 10, "tick_ms": 2000, "hype_percentile": 0.9 },
//!   "chat": { "nick": "justinfan4242", "admins": ["vaeben"] },
//!   "helix": { "client_id": "...", "access_token": "..." },
//!   "webhook": { "url": "https://discord.com/api/webhooks/...", "mention": "<@1>" },
//!   "store": { "path": "baseline.json" }
//! }
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::HypeError;
use crate::store::PercentileKey;
use crate::types::StreamId;

/// Default trailing window for the message rate.
pub const DEFAULT_WINDOW_SECS: u64 = 10;
/// Default monitoring tick period.
pub const DEFAULT_TICK_MS: u64 = 2_000;
/// Default percentile whose durable value is the hype threshold.
pub const DEFAULT_HYPE_PERCENTILE: f64 = 0.9;
/// Default number of samples that must accumulate before a flush.
pub const DEFAULT_FLUSH_MIN_SAMPLES: usize = 1_000;
/// Default cooldown after a live-status change before samples are stored.
pub const DEFAULT_STORE_COOLDOWN_SECS: u64 = 90;
/// Default cooldown after a live-status change before flushes are allowed.
pub const DEFAULT_SAVE_COOLDOWN_SECS: u64 = 300;
/// Default viewer normalization constant `K`.
pub const DEFAULT_VIEWER_SCALE: f64 = 1e5;
/// Default bound on concurrent background store/notify jobs.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Logging metadata (module name, log directory).
    pub logging: Option<LoggingConfig>,

    /// Streams to monitor.
    pub streams: Vec<StreamId>,

    /// Monitor tuning.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Chat connection settings.
    pub chat: Option<ChatConfig>,

    /// Helix (stream status / viewer count) API settings.
    pub helix: Option<HelixConfig>,

    /// Outbound webhook for hype notifications.
    pub webhook: Option<WebhookConfig>,

    /// Durable percentile store.
    pub store: Option<StoreConfig>,
}

impl AppConfig {
    /// Returns the module name used as the log file prefix.
    pub fn module_name(&self) -> String {
        self.logging.as_ref().and_then(|l| l.module_name.clone()).unwrap_or_else(|| "hype-monitor".to_string())
    }

    /// Returns the log directory, if file logging is configured.
    pub fn log_path(&self) -> Option<String> {
        self.logging.as_ref().and_then(|l| l.log_path.clone())
    }
}

/// Logging metadata block.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
}

/// Monitor tuning knobs. All optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonitorConfig {
    /// Trailing window length in seconds.
    pub window_secs: Option<u64>,

    /// Tick period in milliseconds.
    pub tick_ms: Option<u64>,

    /// Percentile (on the baseline grid) used as the hype threshold.
    pub hype_percentile: Option<f64>,

    /// Samples required before a flush to durable storage.
    pub flush_min_samples: Option<usize>,

    /// Seconds after a live-status change before samples are stored.
    pub store_cooldown_secs: Option<u64>,

    /// Seconds after a live-status change before flushes are allowed.
    pub save_cooldown_secs: Option<u64>,

    /// Whether to normalize the rate by the current viewer count.
    pub normalize_by_viewers: Option<bool>,

    /// Normalization constant `K` in `count * K / (window * viewers)`.
    pub viewer_scale: Option<f64>,

    /// When set, and no durable baseline exists yet, derive the threshold from
    /// the in-memory samples once at least this many have been collected.
    pub live_threshold_min_samples: Option<usize>,

    /// Upper bound on concurrent background flush / notification jobs.
    pub max_concurrent_jobs: Option<usize>,
}

/// Chat (IRC over WebSocket) connection settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatConfig {
    /// WebSocket endpoint (default: Twitch IRC).
    pub url: Option<String>,

    /// Login nick. Anonymous `justinfan` nicks need no token.
    pub nick: Option<String>,

    /// OAuth token (`oauth:...`), required to send command replies.
    pub token: Option<String>,

    /// Users allowed to run commands.
    #[serde(default)]
    pub admins: Vec<String>,

    /// Prefix prepended to every command keyword.
    pub command_prefix: Option<String>,
}

impl ChatConfig {
    pub fn effective_url(&self) -> String {
        self.url.clone().unwrap_or_else(|| "wss://irc-ws.chat.twitch.tv:443".to_string())
    }

    pub fn effective_nick(&self) -> String {
        self.nick.clone().unwrap_or_else(|| "justinfan4242".to_string())
    }

    pub fn effective_prefix(&self) -> String {
        self.command_prefix.clone().unwrap_or_default()
    }
}

/// Helix REST API settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HelixConfig {
    pub client_id: String,
    pub access_token: String,

    /// REST base URL (default: `https://api.twitch.tv/helix`).
    pub base_url: Option<String>,

    /// Poll interval for live status and viewer counts.
    pub poll_interval_sec: Option<u64>,
}

impl HelixConfig {
    pub fn effective_base_url(&self) -> String {
        self.base_url.clone().unwrap_or_else(|| "https://api.twitch.tv/helix".to_string())
    }

    pub fn effective_poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_sec.unwrap_or(60).max(1))
    }
}

/// Outbound webhook settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub url: String,

    /// Mention prepended to every notification (e.g. `<@1234>`).
    pub mention: Option<String>,

    /// Set to `false` to keep the config but log instead of posting.
    pub enabled: Option<bool>,
}

impl WebhookConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

/// Durable store settings. Without a path, an in-memory store is used.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub path: Option<String>,
}

/// Validated monitor settings, resolved from [`MonitorConfig`].
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub window_secs: u64,
    pub tick: Duration,
    pub hype_percentile: PercentileKey,
    pub flush_min_samples: usize,
    pub store_cooldown_ms: u64,
    pub save_cooldown_ms: u64,
    pub normalize_by_viewers: bool,
    pub viewer_scale: f64,
    pub live_threshold_min_samples: Option<usize>,
    pub max_concurrent_jobs: usize,
}

impl MonitorSettings {
    pub fn from_config(cfg: &MonitorConfig) -> Result<Self, HypeError> {
        let window_secs = cfg.window_secs.unwrap_or(DEFAULT_WINDOW_SECS);
        if window_secs == 0 {
            return Err(HypeError::Config("monitor.window_secs must be > 0".into()));
        }

        let tick_ms = cfg.tick_ms.unwrap_or(DEFAULT_TICK_MS);
        if tick_ms == 0 {
            return Err(HypeError::Config("monitor.tick_ms must be > 0".into()));
        }

        let p = cfg.hype_percentile.unwrap_or(DEFAULT_HYPE_PERCENTILE);
        let hype_percentile = PercentileKey::on_grid(p)
            .ok_or_else(|| HypeError::Config(format!("monitor.hype_percentile {p} is not on the baseline grid")))?;

        let viewer_scale = cfg.viewer_scale.unwrap_or(DEFAULT_VIEWER_SCALE);
        if !(viewer_scale.is_finite() && viewer_scale > 0.0) {
            return Err(HypeError::Config(format!("monitor.viewer_scale must be positive, got {viewer_scale}")));
        }

        Ok(Self {
            window_secs,
            tick: Duration::from_millis(tick_ms),
            hype_percentile,
            flush_min_samples: cfg.flush_min_samples.unwrap_or(DEFAULT_FLUSH_MIN_SAMPLES).max(1),
            store_cooldown_ms: cfg.store_cooldown_secs.unwrap_or(DEFAULT_STORE_COOLDOWN_SECS) * 1_000,
            save_cooldown_ms: cfg.save_cooldown_secs.unwrap_or(DEFAULT_SAVE_COOLDOWN_SECS) * 1_000,
            normalize_by_viewers: cfg.normalize_by_viewers.unwrap_or(false),
            viewer_scale,
            live_threshold_min_samples: cfg.live_threshold_min_samples,
            max_concurrent_jobs: cfg.max_concurrent_jobs.unwrap_or(DEFAULT_MAX_CONCURRENT_JOBS).max(1),
        })
    }

    /// Window length in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_secs * 1_000
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_WINDOW_SECS,
            tick: Duration::from_millis(DEFAULT_TICK_MS),
            hype_percentile: PercentileKey::from_basis_points(9_000),
            flush_min_samples: DEFAULT_FLUSH_MIN_SAMPLES,
            store_cooldown_ms: DEFAULT_STORE_COOLDOWN_SECS * 1_000,
            save_cooldown_ms: DEFAULT_SAVE_COOLDOWN_SECS * 1_000,
            normalize_by_viewers: false,
            viewer_scale: DEFAULT_VIEWER_SCALE,
            live_threshold_min_samples: None,
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
        }
    }
}

/// Load and parse a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse a JSON config document.
pub fn parse_config(content: &str) -> anyhow::Result<AppConfig> {
    let config: AppConfig = serde_json::from_str(content)?;
    if config.streams.is_empty() {
        return Err(HypeError::Config("no streams configured".into()).into());
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = parse_config(r##"{ "streams": ["Buddha", "#vaeben"] }"##).unwrap();
        assert_eq!(cfg.streams.len(), 2);
        assert_eq!(cfg.streams[1].as_str(), "vaeben");
        assert_eq!(cfg.module_name(), "hype-monitor");

        let settings = MonitorSettings::from_config(&cfg.monitor).unwrap();
        assert_eq!(settings.window_secs, 10);
        assert_eq!(settings.tick, Duration::from_secs(2));
        assert_eq!(settings.hype_percentile.as_f64(), 0.9);
        assert_eq!(settings.flush_min_samples, 1000);
    }

    #[test]
    fn full_config_parses() {
        let cfg = parse_config(
            r#"{
                "logging": { "module_name": "hm", "log_path": "/tmp/hm" },
                "streams": ["buddha"],
                "monitor": { "window_secs": 30, "hype_percentile": 0.95, "normalize_by_viewers": true },
                "chat": { "admins": ["vaeben"] },
                "helix": { "client_id": "id", "access_token": "tok", "poll_interval_sec": 30 },
                "webhook": { "url": "http://localhost/hook", "mention": "<@1>" },
                "store": { "path": "baseline.json" }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.log_path().as_deref(), Some("/tmp/hm"));
        assert_eq!(cfg.chat.unwrap().effective_url(), "wss://irc-ws.chat.twitch.tv:443");
        assert_eq!(cfg.helix.unwrap().effective_poll_interval(), Duration::from_secs(30));
        assert!(cfg.webhook.unwrap().is_enabled());

        let settings = MonitorSettings::from_config(&cfg.monitor).unwrap();
        assert_eq!(settings.window_ms(), 30_000);
        assert!(settings.normalize_by_viewers);
    }

    #[test]
    fn rejects_invalid_settings() {
        assert!(parse_config(r#"{ "streams": [] }"#).is_err());
        assert!(parse_config(r#"{ "streams": [""] }"#).is_err());

        let off_grid = MonitorConfig { hype_percentile: Some(0.75), ..Default::default() };
        assert!(MonitorSettings::from_config(&off_grid).is_err());

        let zero_window = MonitorConfig { window_secs: Some(0), ..Default::default() };
        assert!(MonitorSettings::from_config(&zero_window).is_err());
    }
}

//! # hype-runner
//!
//! Main entry point for the hype monitor.
//!
//! Loads a JSON configuration file, wires the percentile store, notification
//! sink and stream-status source, starts one monitor per configured stream,
//! and feeds them from the chat connection until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! hype-runner config.json --log-level info
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use hype_api::{HelixClient, StatusPoller, WebhookSink};
use hype_chat::{ChatConnConfig, ChatConnection, ChatFeed, CommandSet};
use hype_core::config::{AppConfig, ChatConfig, MonitorSettings};
use hype_core::metadata::{AlwaysLive, StreamMetadata};
use hype_core::notify::{LogSink, NotificationSink};
use hype_core::registry::MonitorRegistry;
use hype_core::store::{JsonFileStore, MemoryStore, PercentileStore};
use hype_core::time_util::now_ms;
use hype_core::types::Stream;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Chat hype monitor.
#[derive(Parser)]
#[command(name = "hype-runner", about = "Chat hype monitor")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output (overrides `logging.log_path`).
    #[arg(long)]
    log_dir: Option<String>,
}

fn build_store(config: &AppConfig) -> Arc<dyn PercentileStore> {
    match config.store.as_ref().and_then(|s| s.path.as_deref()) {
        Some(path) => {
            info!("baseline store: {path}");
            Arc::new(JsonFileStore::new(path))
        }
        None => {
            warn!("no store path configured, baseline is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    }
}

fn build_webhook(config: &AppConfig) -> Result<Option<Arc<WebhookSink>>> {
    match &config.webhook {
        Some(w) if w.is_enabled() => Ok(Some(Arc::new(WebhookSink::new(&w.url, w.mention.clone())?))),
        _ => Ok(None),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration (logging layout depends on it)
    let config = hype_core::config::load_config(&cli.config)?;
    let settings = MonitorSettings::from_config(&config.monitor)?;

    // 2. Initialize logging
    let log_dir = cli.log_dir.clone().or_else(|| config.log_path());
    hype_core::logging::init_logging(&cli.log_level, log_dir.as_deref(), &config.module_name());

    info!(
        "hype-runner starting, config={}, {} stream(s), window={}s, tick={:?}, threshold=p{}",
        cli.config.display(),
        config.streams.len(),
        settings.window_secs,
        settings.tick,
        settings.hype_percentile,
    );

    // 3. Collaborators
    let store = build_store(&config);
    let webhook = build_webhook(&config)?;
    let notifier: Arc<dyn NotificationSink> = match &webhook {
        Some(w) => w.clone(),
        None => Arc::new(LogSink),
    };
    let helix = config.helix.as_ref().map(|h| {
        Arc::new(HelixClient::new(h.client_id.clone(), h.access_token.clone(), h.effective_base_url()))
    });
    let metadata: Arc<dyn StreamMetadata> = match &helix {
        Some(h) => h.clone(),
        None => {
            warn!("no helix credentials, treating every stream as live");
            Arc::new(AlwaysLive)
        }
    };

    // 4. Monitors
    let registry = Arc::new(MonitorRegistry::new(settings, store, metadata, notifier));
    for id in &config.streams {
        registry.add_stream(Stream::new(id.clone())).await?;
    }
    if helix.is_none() {
        let now = now_ms();
        for id in &config.streams {
            registry.on_stream_online(id, now).await?;
        }
    }

    if let Some(w) = &webhook {
        if let Err(e) = w.announce_startup().await {
            warn!("startup webhook failed: {e:#}");
        }
    }

    // 5. Stream status polling
    let poller = match (&helix, &config.helix) {
        (Some(h), Some(cfg)) => {
            Some(StatusPoller::new(h.clone(), registry.clone(), cfg.effective_poll_interval()).spawn())
        }
        _ => None,
    };

    // 6. Chat
    let chat_cfg = config.chat.clone().unwrap_or_default();
    if !chat_cfg.admins.is_empty() && chat_cfg.token.is_none() {
        warn!("chat admins configured without a token, command replies will not be delivered");
    }
    let mut connection = ChatConnection::new(conn_config(&chat_cfg, &config));
    let commands = CommandSet::with_defaults(chat_cfg.effective_prefix(), &chat_cfg.admins);
    let feed = ChatFeed::new(registry.clone(), commands, connection.handle());
    let (messages_tx, messages_rx) = mpsc::channel(4096);
    let feed_task = feed.spawn(messages_rx);
    connection.start(messages_tx)?;

    info!("monitoring {} stream(s), press Ctrl+C to stop", config.streams.len());

    // 7. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    connection.stop().await;
    if let Some(p) = poller {
        p.abort();
    }
    if let Err(e) = feed_task.await {
        error!("chat feed task failed: {e}");
    }
    registry.shutdown().await;

    info!("stopped, goodbye");
    Ok(())
}

fn conn_config(chat: &ChatConfig, config: &AppConfig) -> ChatConnConfig {
    ChatConnConfig {
        url: chat.effective_url(),
        nick: chat.effective_nick(),
        token: chat.token.clone(),
        channels: config.streams.clone(),
    }
}

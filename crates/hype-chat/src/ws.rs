//! Chat connection over WebSocket with auto-reconnect.
//!
//! The connection runs as a tokio task that:
//! 1. Connects to the chat endpoint (TLS).
//! 2. Sends the login sequence (`PASS`/`NICK`/`JOIN`).
//! 3. Answers `PING` with `PONG` and forwards `PRIVMSG`s as [`ChatMessage`]s.
//! 4. Drains the outbound queue (command replies).
//! 5. Reconnects with exponential backoff on disconnection or `RECONNECT`.

use std::time::Duration;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use hype_core::error::HypeError;
use hype_core::time_util::now_ms;
use hype_core::types::{ChatMessage, StreamId};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::irc::{self, IrcLine};

/// Connection settings resolved from the chat config.
#[derive(Debug, Clone)]
pub struct ChatConnConfig {
    /// WebSocket URL (e.g. `wss://irc-ws.chat.twitch.tv:443`).
    pub url: String,
    pub nick: String,
    pub token: Option<String>,
    pub channels: Vec<StreamId>,
}

/// Cloneable handle for queueing outbound chat lines.
#[derive(Debug, Clone)]
pub struct ChatHandle {
    outbound_tx: mpsc::Sender<String>,
}

impl ChatHandle {
    pub fn new(outbound_tx: mpsc::Sender<String>) -> Self {
        Self { outbound_tx }
    }

    /// Queue a message to `channel`, truncated to the chat line limit.
    pub async fn say(&self, channel: &StreamId, text: &str) -> Result<()> {
        info!("[chat] #{channel} <- {text}");
        self.outbound_tx
            .send(irc::privmsg(channel.as_str(), text))
            .await
            .map_err(|_| HypeError::Chat("outbound queue closed".into()))?;
        Ok(())
    }
}

/// A chat connection managed by a background tokio task.
pub struct ChatConnection {
    config: ChatConnConfig,
    handle: ChatHandle,
    outbound_rx: Option<mpsc::Receiver<String>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl ChatConnection {
    /// Create a new (not yet started) connection.
    pub fn new(config: ChatConnConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel::<String>(64);
        Self {
            config,
            handle: ChatHandle::new(outbound_tx),
            outbound_rx: Some(outbound_rx),
            shutdown_tx: None,
            task: None,
        }
    }

    pub fn handle(&self) -> ChatHandle {
        self.handle.clone()
    }

    /// Start the connection task, forwarding chat messages to `messages_tx`.
    pub fn start(&mut self, messages_tx: mpsc::Sender<ChatMessage>) -> Result<()> {
        let outbound_rx = self
            .outbound_rx
            .take()
            .ok_or_else(|| HypeError::Chat("chat connection already started".into()))?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = self.config.clone();

        let task = tokio::spawn(async move {
            connection_loop(config, messages_tx, outbound_rx, shutdown_rx).await;
        });

        self.shutdown_tx = Some(shutdown_tx);
        self.task = Some(task);
        Ok(())
    }

    /// Stop the connection and wait for the task to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// What the read loop decided after one server line.
enum LineAction {
    Continue,
    Reply(String),
    Reconnect,
}

fn handle_line(line: &str, messages_tx: &mpsc::Sender<ChatMessage>) -> LineAction {
    match irc::parse_line(line) {
        Some(IrcLine::Ping(token)) => LineAction::Reply(format!("PONG :{token}")),
        Some(IrcLine::Privmsg { channel, author, text }) => {
            let Ok(stream) = StreamId::new(channel) else {
                return LineAction::Continue;
            };
            let msg = ChatMessage {
                stream,
                author: author.to_lowercase(),
                text: text.to_string(),
                received_at_ms: now_ms(),
            };
            if let Err(e) = messages_tx.try_send(msg) {
                warn!("[chat] dropping message, feed is behind: {e}");
            }
            LineAction::Continue
        }
        Some(IrcLine::Reconnect) => LineAction::Reconnect,
        Some(IrcLine::Welcome) => {
            info!("[chat] logged in");
            LineAction::Continue
        }
        Some(IrcLine::Notice { text }) => {
            warn!("[chat] notice: {text}");
            LineAction::Continue
        }
        Some(IrcLine::Other(cmd)) => {
            debug!("[chat] {cmd}: {line}");
            LineAction::Continue
        }
        None => LineAction::Continue,
    }
}

/// Main connection loop: connects, logs in, reads, replies, reconnects.
async fn connection_loop(
    config: ChatConnConfig,
    messages_tx: mpsc::Sender<ChatMessage>,
    mut outbound_rx: mpsc::Receiver<String>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = Duration::from_millis(100);
    let max_backoff = Duration::from_secs(30);
    let channels: Vec<String> = config.channels.iter().map(|c| c.as_str().to_string()).collect();

    loop {
        if *shutdown_rx.borrow() {
            info!("[chat] shutdown requested");
            return;
        }

        info!("[chat] connecting to {}", config.url);

        let ws_stream = match tokio_tungstenite::connect_async(config.url.as_str()).await {
            Ok((s, _response)) => {
                backoff = Duration::from_millis(100);
                info!("[chat] connected");
                s
            }
            Err(e) => {
                error!("[chat] connection failed: {e}, retrying in {backoff:?}");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {},
                    _ = shutdown_rx.changed() => return,
                }
                backoff = (backoff * 2).min(max_backoff);
                continue;
            }
        };

        let (mut ws_write, mut ws_read) = ws_stream.split();

        let mut login_ok = true;
        for line in irc::login_lines(&config.nick, config.token.as_deref(), &channels) {
            if let Err(e) = ws_write.send(Message::Text(line.into())).await {
                error!("[chat] login send failed: {e}");
                login_ok = false;
                break;
            }
        }
        if login_ok {
            info!("[chat] joined {} channels as {}", channels.len(), config.nick);
        }

        while login_ok {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("[chat] shutdown signal received");
                    let _ = ws_write.close().await;
                    return;
                }

                msg = ws_read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let mut reconnect = false;
                            for line in text.lines() {
                                match handle_line(line, &messages_tx) {
                                    LineAction::Continue => {}
                                    LineAction::Reply(reply) => {
                                        if let Err(e) = ws_write.send(Message::Text(reply.into())).await {
                                            error!("[chat] pong send error: {e}");
                                            reconnect = true;
                                        }
                                    }
                                    LineAction::Reconnect => {
                                        warn!("[chat] server requested reconnect");
                                        reconnect = true;
                                    }
                                }
                            }
                            if reconnect {
                                break;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = ws_write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) => {
                            warn!("[chat] received close frame");
                            break;
                        }
                        Some(Err(e)) => {
                            error!("[chat] read error: {e}");
                            break;
                        }
                        None => {
                            warn!("[chat] stream ended");
                            break;
                        }
                        _ => {}
                    }
                }

                Some(line) = outbound_rx.recv() => {
                    if let Err(e) = ws_write.send(Message::Text(line.into())).await {
                        error!("[chat] send error: {e}");
                        break;
                    }
                }
            }
        }

        warn!("[chat] disconnected, reconnecting in {backoff:?}");
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {},
            _ = shutdown_rx.changed() => return,
        }
        backoff = (backoff * 2).min(max_backoff);
    }
}

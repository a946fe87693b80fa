//! # hype-chat
//!
//! Chat ingestion for the hype monitor: an IRC-over-WebSocket connection
//! ([`ws`]), line parsing ([`irc`]) and operator commands ([`commands`]).
//!
//! ```text
//! ChatConnection ──► mpsc<ChatMessage> ──► ChatFeed ──► MonitorRegistry.on_message
//!       ▲                                     └──────► CommandSet.dispatch (admins)
//!       └──────────── ChatHandle (replies) ◄──────────────┘
//! ```

pub mod commands;
pub mod irc;
pub mod ws;

use std::sync::Arc;

use hype_core::registry::MonitorRegistry;
use hype_core::types::ChatMessage;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

pub use commands::{Command, CommandContext, CommandSet};
pub use ws::{ChatConnConfig, ChatConnection, ChatHandle};

/// Routes chat messages into the registry, then runs admin commands.
pub struct ChatFeed {
    registry: Arc<MonitorRegistry>,
    commands: CommandSet,
    chat: ChatHandle,
}

impl ChatFeed {
    pub fn new(registry: Arc<MonitorRegistry>, commands: CommandSet, chat: ChatHandle) -> Self {
        Self { registry, commands, chat }
    }

    /// Handle one message. Activity is counted before any command runs.
    pub async fn handle(&self, msg: &ChatMessage) {
        self.registry.on_message(msg).await;
        self.commands.dispatch(&self.registry, &self.chat, msg).await;
    }

    /// Consume `rx` until every sender is gone.
    pub fn spawn(self, mut rx: mpsc::Receiver<ChatMessage>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                self.handle(&msg).await;
            }
            info!("[chat] feed closed");
        })
    }
}

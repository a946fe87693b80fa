//! Chat commands for operators.
//!
//! A message is a command when its first word (after the configured prefix)
//! matches a registered [`Command`] and the author is an admin. Non-admin
//! messages are never inspected beyond activity counting.
//!
//! | Command                   | Effect                                              |
//! |---------------------------|-----------------------------------------------------|
//! | `ping`                    | replies `LUL`                                       |
//! | `clearactivity <channel>` | deletes the channel's baseline, re-fetches threshold |

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use hype_core::registry::MonitorRegistry;
use hype_core::types::{ChatMessage, StreamId};
use tracing::{info, warn};

use crate::ws::ChatHandle;

/// Everything a command invocation can see.
pub struct CommandContext<'a> {
    pub registry: &'a MonitorRegistry,
    pub chat: &'a ChatHandle,
    /// Channel the command was typed in; replies go here.
    pub channel: &'a StreamId,
    pub author: &'a str,
    pub args: &'a [&'a str],
}

impl CommandContext<'_> {
    pub async fn reply(&self, text: &str) -> Result<()> {
        self.chat.say(self.channel, text).await
    }
}

#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether `word` (prefix already stripped) selects this command.
    fn matches(&self, word: &str) -> bool {
        word.eq_ignore_ascii_case(self.name())
    }

    async fn invoke(&self, ctx: &CommandContext<'_>) -> Result<()>;
}

/// Liveness check.
pub struct Ping;

#[async_trait]
impl Command for Ping {
    fn name(&self) -> &'static str {
        "ping"
    }

    async fn invoke(&self, ctx: &CommandContext<'_>) -> Result<()> {
        ctx.reply("LUL").await?;
        info!("[cmd] pinged by {}", ctx.author);
        Ok(())
    }
}

/// Delete a channel's durable baseline and reload its threshold.
pub struct ClearActivity;

#[async_trait]
impl Command for ClearActivity {
    fn name(&self) -> &'static str {
        "clearactivity"
    }

    async fn invoke(&self, ctx: &CommandContext<'_>) -> Result<()> {
        let Some(&arg) = ctx.args.first() else {
            return Ok(());
        };
        let target = match StreamId::new(arg) {
            Ok(id) => id,
            Err(e) => return ctx.reply(&format!("Clear errored: {e}")).await,
        };

        ctx.reply(&format!("Clearing all activity data for channel {target}...")).await?;
        match ctx.registry.reset_baseline(&target).await {
            Ok(deleted) => {
                info!("[cmd] {} cleared {deleted} records of {target}", ctx.author);
                ctx.reply("Cleared activity data.").await
            }
            Err(e) => {
                warn!("[cmd] clearactivity {target} failed: {e:#}");
                ctx.reply(&format!("Clear errored: {e}")).await
            }
        }
    }
}

/// Registered commands plus the admin gate.
pub struct CommandSet {
    prefix: String,
    admins: Vec<String>,
    commands: Vec<Arc<dyn Command>>,
}

impl CommandSet {
    pub fn new(prefix: impl Into<String>, admins: &[String]) -> Self {
        Self {
            prefix: prefix.into(),
            admins: admins.iter().map(|a| a.trim().to_lowercase()).collect(),
            commands: Vec::new(),
        }
    }

    /// The built-in command set.
    pub fn with_defaults(prefix: impl Into<String>, admins: &[String]) -> Self {
        let mut set = Self::new(prefix, admins);
        set.register(Arc::new(Ping));
        set.register(Arc::new(ClearActivity));
        set
    }

    pub fn register(&mut self, command: Arc<dyn Command>) {
        self.commands.push(command);
    }

    pub fn is_admin(&self, author: &str) -> bool {
        self.admins.iter().any(|a| a.eq_ignore_ascii_case(author))
    }

    /// Find the command `text` invokes, with its arguments.
    pub fn lookup<'t>(&self, text: &'t str) -> Option<(Arc<dyn Command>, Vec<&'t str>)> {
        let mut words = text.split_whitespace();
        let word = words.next()?.strip_prefix(self.prefix.as_str())?;
        let command = self.commands.iter().find(|c| c.matches(word))?.clone();
        Some((command, words.collect()))
    }

    /// Run the command in `msg`, if any. Returns whether one ran.
    pub async fn dispatch(&self, registry: &MonitorRegistry, chat: &ChatHandle, msg: &ChatMessage) -> bool {
        if !self.is_admin(&msg.author) {
            return false;
        }
        let Some((command, args)) = self.lookup(&msg.text) else {
            return false;
        };

        info!("[cmd] {} sent '{}' in #{} with args {args:?}", msg.author, command.name(), msg.stream);
        let ctx = CommandContext { registry, chat, channel: &msg.stream, author: &msg.author, args: &args };
        if let Err(e) = command.invoke(&ctx).await {
            warn!("[cmd] '{}' failed: {e:#}", command.name());
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use hype_core::config::MonitorSettings;
    use hype_core::metadata::AlwaysLive;
    use hype_core::notify::LogSink;
    use hype_core::store::{MemoryStore, PercentileKey, PercentileStore};
    use hype_core::types::Stream;
    use tokio::sync::mpsc;

    use super::*;

    fn msg(author: &str, text: &str) -> ChatMessage {
        ChatMessage {
            stream: StreamId::new("buddha").unwrap(),
            author: author.into(),
            text: text.into(),
            received_at_ms: 0,
        }
    }

    fn setup() -> (MonitorRegistry, Arc<MemoryStore>, ChatHandle, mpsc::Receiver<String>) {
        let store = Arc::new(MemoryStore::new());
        let registry =
            MonitorRegistry::new(MonitorSettings::default(), store.clone(), Arc::new(AlwaysLive), Arc::new(LogSink));
        let (tx, rx) = mpsc::channel(16);
        (registry, store, ChatHandle::new(tx), rx)
    }

    #[test]
    fn lookup_respects_prefix() {
        let admins = vec!["vaeben".to_string()];
        let set = CommandSet::with_defaults("!", &admins);
        assert!(set.lookup("ping").is_none());
        let (cmd, args) = set.lookup("!PING now").unwrap();
        assert_eq!(cmd.name(), "ping");
        assert_eq!(args, vec!["now"]);
        assert!(set.lookup("!pong").is_none());
        assert!(set.is_admin("Vaeben"));
        assert!(!set.is_admin("someone"));
    }

    #[tokio::test]
    async fn non_admins_are_ignored() {
        let (registry, _store, chat, mut rx) = setup();
        let set = CommandSet::with_defaults("", &["vaeben".to_string()]);
        assert!(!set.dispatch(&registry, &chat, &msg("viewer", "ping")).await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn ping_replies() {
        let (registry, _store, chat, mut rx) = setup();
        let set = CommandSet::with_defaults("", &["vaeben".to_string()]);
        assert!(set.dispatch(&registry, &chat, &msg("vaeben", "ping")).await);
        assert_eq!(rx.recv().await.unwrap(), "PRIVMSG #buddha :LUL");
    }

    #[tokio::test]
    async fn clearactivity_wipes_baseline() {
        let (registry, store, chat, mut rx) = setup();
        let target = StreamId::new("vaeben").unwrap();
        registry.register(Stream::new(target.clone())).await.unwrap();
        store.upsert(&target, PercentileKey::MAX, 4.0, 3).await.unwrap();

        let set = CommandSet::with_defaults("", &["vaeben".to_string()]);
        assert!(set.dispatch(&registry, &chat, &msg("vaeben", "clearactivity #Vaeben")).await);

        assert_eq!(rx.recv().await.unwrap(), "PRIVMSG #buddha :Clearing all activity data for channel vaeben...");
        assert_eq!(rx.recv().await.unwrap(), "PRIVMSG #buddha :Cleared activity data.");
        assert!(store.records(&target).await.is_empty());
    }

    #[tokio::test]
    async fn clearactivity_unknown_channel_reports_error() {
        let (registry, _store, chat, mut rx) = setup();
        let set = CommandSet::with_defaults("", &["vaeben".to_string()]);
        set.dispatch(&registry, &chat, &msg("vaeben", "clearactivity nobody")).await;

        rx.recv().await.unwrap();
        assert!(rx.recv().await.unwrap().starts_with("PRIVMSG #buddha :Clear errored:"));
    }

    #[tokio::test]
    async fn clearactivity_without_args_is_silent() {
        let (registry, _store, chat, mut rx) = setup();
        let set = CommandSet::with_defaults("", &["vaeben".to_string()]);
        assert!(set.dispatch(&registry, &chat, &msg("vaeben", "clearactivity")).await);
        assert!(rx.try_recv().is_err());
    }
}

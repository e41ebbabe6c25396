//! Contract for the chat platform the relay delivers into.
//!
//! The relay never talks to a platform SDK directly. Everything it needs
//! (delivery, deletion, reactions, permission checks) goes through
//! [`ChatClient`], so the ingestion core can be driven by any platform binding
//! or by an in-memory fake in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

pub type ServerId = u64;
pub type ChannelId = u64;
pub type MessageId = u64;
pub type UserId = u64;

/// A text channel on a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Destination {
    pub server_id: ServerId,
    pub channel_id: ChannelId,
}

impl Destination {
    pub fn new(server_id: ServerId, channel_id: ChannelId) -> Self {
        Self {
            server_id,
            channel_id,
        }
    }
}

/// Handle to a message the bot has sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SentMessage {
    pub id: MessageId,
    pub destination: Destination,
}

/// Rich preview card.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Embed {
    pub title: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub author_name: Option<String>,
    pub author_icon_url: Option<String>,
    pub footer: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Content of one outgoing message; at least one part should be set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: Option<String>,
    pub embed: Option<Embed>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            embed: None,
        }
    }

    pub fn with_embed(mut self, embed: Embed) -> Self {
        self.embed = Some(embed);
        self
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    /// The bot lacks the permission the operation needs
    #[error("Missing permissions: {0}")]
    PermissionDenied(String),
    /// The message or channel no longer exists
    #[error("Not found")]
    NotFound,
    #[error("Chat platform error: {0}")]
    Other(String),
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// The bot's own user id, used to ignore its own events.
    fn current_user(&self) -> UserId;

    /// Whether the destination still exists and is visible to the bot.
    async fn destination_exists(&self, destination: Destination) -> bool;

    /// Whether the bot may currently post into the destination.
    async fn can_send(&self, destination: Destination) -> bool;

    /// Sends a message. Platforms may split one logical message into several.
    async fn send_message(
        &self,
        destination: Destination,
        message: OutgoingMessage,
    ) -> Result<Vec<SentMessage>, ChatError>;

    async fn delete_message(&self, message: SentMessage) -> Result<(), ChatError>;

    async fn add_reaction(&self, message: SentMessage, emoji: &str) -> Result<(), ChatError>;

    /// Removes the bot's own reaction.
    async fn remove_reaction(&self, message: SentMessage, emoji: &str) -> Result<(), ChatError>;
}

/// Prints deliveries to stdout instead of posting them. Backs the CLI
/// commands, which run the relay without a platform connection.
#[derive(Debug)]
pub struct ConsoleChat {
    next_id: AtomicU64,
}

impl ConsoleChat {
    /// The bot's user id on the console.
    pub const BOT_USER: UserId = 0;

    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for ConsoleChat {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatClient for ConsoleChat {
    fn current_user(&self) -> UserId {
        Self::BOT_USER
    }

    async fn destination_exists(&self, _destination: Destination) -> bool {
        true
    }

    async fn can_send(&self, _destination: Destination) -> bool {
        true
    }

    async fn send_message(
        &self,
        destination: Destination,
        message: OutgoingMessage,
    ) -> Result<Vec<SentMessage>, ChatError> {
        let sent = SentMessage {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            destination,
        };
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", render_plain(&message))
            .map_err(|e| ChatError::Other(e.to_string()))?;
        Ok(vec![sent])
    }

    async fn delete_message(&self, message: SentMessage) -> Result<(), ChatError> {
        tracing::info!(message_id = message.id, "Deleted message");
        Ok(())
    }

    async fn add_reaction(&self, message: SentMessage, emoji: &str) -> Result<(), ChatError> {
        tracing::debug!(message_id = message.id, emoji, "Added reaction");
        Ok(())
    }

    async fn remove_reaction(&self, message: SentMessage, emoji: &str) -> Result<(), ChatError> {
        tracing::debug!(message_id = message.id, emoji, "Removed reaction");
        Ok(())
    }
}

/// Plain-text rendering of a message, text first, then the embed's fields.
pub fn render_plain(message: &OutgoingMessage) -> String {
    let mut lines: Vec<String> = message.text.iter().cloned().collect();
    if let Some(embed) = &message.embed {
        let fields = [
            &embed.author_name,
            &embed.title,
            &embed.url,
            &embed.description,
            &embed.image_url,
            &embed.footer,
        ];
        lines.extend(fields.into_iter().flatten().cloned());
        if let Some(timestamp) = embed.timestamp {
            lines.push(timestamp.to_rfc3339());
        }
    }
    lines.join("\n")
}

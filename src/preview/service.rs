use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

use super::links::extract_post_links;
use super::post::{
    parse_media_post, post_request, render_media_post, PostError, PreviewStyle, QUERY_ENDPOINT,
};
use super::tracker::PreviewRetractionTracker;
use crate::chat::{ChatClient, ChatError, Destination, MessageId, OutgoingMessage, UserId};
use crate::fetch::{FetchError, ResilientFetcher};
use crate::settings::{MediaSettings, SettingsStore, UserMediaSettings};
use crate::util::spawn_logged;

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Post(#[from] PostError),
    #[error(transparent)]
    Chat(#[from] ChatError),
}

impl PreviewError {
    /// Reply shown to the user who asked for the preview.
    pub fn user_message(&self) -> &'static str {
        match self {
            PreviewError::Fetch(e) => e.user_message(),
            PreviewError::Post(_) | PreviewError::Chat(_) => "Failed to create preview.",
        }
    }
}

/// A chat message seen by the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: MessageId,
    pub destination: Destination,
    pub author_id: UserId,
    pub author_is_bot: bool,
    pub content: String,
}

/// A reaction added to some message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionEvent {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
}

/// Prefix of bot commands when none is configured.
pub const DEFAULT_COMMAND_PREFIX: &str = ">";

/// Command names that request a preview explicitly.
const PREVIEW_COMMANDS: &[&str] = &["ig", "instagram"];

/// Posts previews for links that show up in chat, and routes retraction
/// requests to the tracker.
///
/// Automatic previews are opt-in, per server or per user, through the
/// [`SettingsStore`].
#[derive(Clone)]
pub struct PreviewService {
    fetcher: ResilientFetcher,
    chat: Arc<dyn ChatClient>,
    settings: Arc<dyn SettingsStore>,
    tracker: PreviewRetractionTracker,
    links_per_message: usize,
    endpoint: String,
    command_prefix: String,
    default_style: PreviewStyle,
}

impl PreviewService {
    pub fn new(
        fetcher: ResilientFetcher,
        chat: Arc<dyn ChatClient>,
        settings: Arc<dyn SettingsStore>,
        tracker: PreviewRetractionTracker,
        links_per_message: usize,
    ) -> Self {
        Self {
            fetcher,
            chat,
            settings,
            tracker,
            links_per_message,
            endpoint: QUERY_ENDPOINT.to_string(),
            command_prefix: DEFAULT_COMMAND_PREFIX.to_string(),
            default_style: PreviewStyle::default(),
        }
    }

    /// Points post lookups at a different GraphQL endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Prefix used to recognise preview commands, which `handle_message`
    /// leaves to `preview_command`.
    pub fn with_command_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.command_prefix = prefix.into();
        self
    }

    /// Style used when neither the user nor the server picked one.
    pub fn with_default_style(mut self, style: PreviewStyle) -> Self {
        self.default_style = style;
        self
    }

    pub fn tracker(&self) -> &PreviewRetractionTracker {
        &self.tracker
    }

    /// Fetches, renders and sends one preview, then registers it for
    /// retraction by `author_id`. Returns the primary message id.
    ///
    /// If a send fails partway, the messages already sent are still
    /// registered before the error is returned.
    pub async fn post_preview(
        &self,
        shortcode: &str,
        destination: Destination,
        style: PreviewStyle,
        author_id: UserId,
    ) -> Result<Option<MessageId>, PreviewError> {
        let request = post_request(&self.endpoint, shortcode)?;
        let body = self.fetcher.fetch_with_retry(&request).await?;
        let post = parse_media_post(shortcode, &body)?;

        let mut sent = Vec::new();
        let mut failure = None;
        for message in render_media_post(&post, style) {
            match self.chat.send_message(destination, message).await {
                Ok(messages) => sent.extend(messages),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let primary = self.tracker.register(author_id, sent).await;
        match failure {
            Some(e) => Err(e.into()),
            None => Ok(primary),
        }
    }

    /// Previews every link in an ordinary chat message, if the author or the
    /// server opted in. Failures are logged per link; returns how many
    /// previews were posted.
    pub async fn handle_message(&self, message: &InboundMessage) -> usize {
        if message.author_is_bot || !self.chat.can_send(message.destination).await {
            return 0;
        }

        let Some(style) = self.auto_preview_style(message).await else {
            return 0;
        };

        let links = extract_post_links(&message.content, self.links_per_message);
        if links.is_empty() {
            return 0;
        }
        if is_preview_command(&message.content, &self.command_prefix) {
            // Answered by `preview_command`
            return 0;
        }
        tracing::debug!(
            message_id = message.id,
            links = links.shortcodes.len(),
            unquoted = links.unquoted,
            ?style,
            "Found post links"
        );

        let mut posted = 0;
        for shortcode in &links.shortcodes {
            match self
                .post_preview(shortcode, message.destination, style, message.author_id)
                .await
            {
                Ok(_) => posted += 1,
                Err(e) => {
                    tracing::error!(
                        shortcode = %shortcode,
                        message_id = message.id,
                        channel_id = message.destination.channel_id,
                        error = %e,
                        "Failed to create preview"
                    );
                }
            }
        }
        posted
    }

    /// Explicit preview request. Without an explicit `style` the author's
    /// preferred style applies. Failures are answered in the channel.
    pub async fn preview_command(
        &self,
        message: &InboundMessage,
        style: Option<PreviewStyle>,
    ) -> usize {
        if !self.chat.can_send(message.destination).await {
            return 0;
        }

        let style = match style {
            Some(style) => style,
            None => self
                .user_style(message.author_id)
                .await
                .unwrap_or(self.default_style),
        };

        let links = extract_post_links(&message.content, self.links_per_message);
        if links.is_empty() {
            self.reply(message.destination, "Not a valid post link.").await;
            return 0;
        }

        let mut posted = 0;
        for shortcode in &links.shortcodes {
            match self
                .post_preview(shortcode, message.destination, style, message.author_id)
                .await
            {
                Ok(_) => posted += 1,
                Err(e) => {
                    tracing::warn!(shortcode = %shortcode, error = %e, "Preview command failed");
                    self.reply(message.destination, e.user_message()).await;
                }
            }
        }
        posted
    }

    /// Retracts a preview when its author clicks the affordance. Returns
    /// whether anything was deleted.
    pub async fn handle_reaction(&self, reaction: &ReactionEvent) -> bool {
        if reaction.user_id == self.chat.current_user() || reaction.emoji != self.tracker.emoji() {
            return false;
        }
        self.tracker
            .try_retract(reaction.message_id, reaction.user_id)
            .await
    }

    /// Fire-and-forget `handle_message`, for the platform's event loop.
    pub fn on_message(&self, message: InboundMessage) -> JoinHandle<()> {
        let service = self.clone();
        spawn_logged("preview-message", async move {
            service.handle_message(&message).await;
            Ok(())
        })
    }

    /// Fire-and-forget `handle_reaction`, for the platform's event loop.
    pub fn on_reaction(&self, reaction: ReactionEvent) -> JoinHandle<()> {
        let service = self.clone();
        spawn_logged("preview-reaction", async move {
            service.handle_reaction(&reaction).await;
            Ok(())
        })
    }

    async fn auto_preview_style(&self, message: &InboundMessage) -> Option<PreviewStyle> {
        let user = match self.settings.read_user(message.author_id).await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(user_id = message.author_id, error = %e, "Failed to read user settings");
                return None;
            }
        };
        if user.as_ref().is_some_and(|u| u.auto_previews) {
            return resolve_auto_style(user.as_ref(), None, self.default_style);
        }

        let server_id = message.destination.server_id;
        match self.settings.read(server_id).await {
            Ok(server) => resolve_auto_style(user.as_ref(), server.as_ref(), self.default_style),
            Err(e) => {
                tracing::warn!(server_id, error = %e, "Failed to read server settings");
                None
            }
        }
    }

    async fn user_style(&self, user_id: UserId) -> Option<PreviewStyle> {
        match self.settings.read_user(user_id).await {
            Ok(user) => user.and_then(|u| u.preview_style),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to read user settings");
                None
            }
        }
    }

    async fn reply(&self, destination: Destination, text: &str) {
        if let Err(e) = self
            .chat
            .send_message(destination, OutgoingMessage::text(text))
            .await
        {
            tracing::warn!(channel_id = destination.channel_id, error = %e, "Failed to send reply");
        }
    }
}

/// Style for an automatic preview, or `None` when nobody opted in.
///
/// A user who turned previews on gets their own style everywhere. On a
/// server with previews on, the user's style still beats the server's.
fn resolve_auto_style(
    user: Option<&UserMediaSettings>,
    server: Option<&MediaSettings>,
    fallback: PreviewStyle,
) -> Option<PreviewStyle> {
    let user_style = user.and_then(|u| u.preview_style);
    if user.is_some_and(|u| u.auto_previews) {
        return Some(user_style.unwrap_or(fallback));
    }

    let server = server.filter(|s| s.auto_previews)?;
    Some(user_style.or(server.preview_style).unwrap_or(fallback))
}

/// Whether `content` invokes one of the preview commands.
fn is_preview_command(content: &str, prefix: &str) -> bool {
    let Some(rest) = content.trim_start().strip_prefix(prefix) else {
        return false;
    };
    let name = rest.split_whitespace().next().unwrap_or_default();
    !rest.starts_with(char::is_whitespace)
        && PREVIEW_COMMANDS
            .iter()
            .any(|command| command.eq_ignore_ascii_case(name))
}

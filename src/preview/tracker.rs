use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::chat::{ChatClient, ChatError, MessageId, SentMessage, UserId};
use crate::util::spawn_logged;

/// Retraction window and the emoji used as the "remove" affordance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerSettings {
    pub window: Duration,
    pub emoji: String,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(30),
            emoji: "❌".to_string(),
        }
    }
}

/// The messages that make up one preview, retractable by the person whose
/// link produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredPreviewGroup {
    pub author_id: UserId,
    /// In send order; the last one carries the affordance
    pub messages: Vec<SentMessage>,
    pub created_at: DateTime<Utc>,
}

impl DeliveredPreviewGroup {
    fn primary(&self) -> Option<SentMessage> {
        self.messages.last().copied()
    }
}

/// Lets the requester of a preview delete it within a short window.
///
/// Each group is keyed by its primary (last) message. Removal from the map
/// is the single decision point: whichever of a retraction or the window
/// expiry removes the entry first wins, and the other becomes a no-op, so a
/// group is deleted at most once.
#[derive(Clone)]
pub struct PreviewRetractionTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    chat: Arc<dyn ChatClient>,
    groups: DashMap<MessageId, DeliveredPreviewGroup>,
    settings: TrackerSettings,
}

impl PreviewRetractionTracker {
    pub fn new(chat: Arc<dyn ChatClient>, settings: TrackerSettings) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                chat,
                groups: DashMap::new(),
                settings,
            }),
        }
    }

    pub fn emoji(&self) -> &str {
        &self.inner.settings.emoji
    }

    /// Tracks a freshly sent preview and attaches the retraction affordance
    /// to its last message. Returns the primary message id.
    ///
    /// Failing to attach the affordance is logged and otherwise ignored; the
    /// preview stays registered so the window still expires normally.
    pub async fn register(
        &self,
        author_id: UserId,
        messages: Vec<SentMessage>,
    ) -> Option<MessageId> {
        let primary = messages.last().copied()?;

        self.inner.groups.insert(
            primary.id,
            DeliveredPreviewGroup {
                author_id,
                messages,
                created_at: Utc::now(),
            },
        );

        match self.inner.chat.add_reaction(primary, self.emoji()).await {
            Ok(()) => {}
            Err(ChatError::PermissionDenied(_)) => {
                tracing::info!(
                    message_id = primary.id,
                    channel_id = primary.destination.channel_id,
                    "Missing permissions to add retraction reaction"
                );
            }
            Err(e) => {
                tracing::warn!(message_id = primary.id, error = %e, "Failed to add retraction reaction");
            }
        }

        let tracker = self.clone();
        let window = self.inner.settings.window;
        spawn_logged("preview-expiry", async move {
            tokio::time::sleep(window).await;
            tracker.expire(primary.id).await;
            Ok(())
        });

        Some(primary.id)
    }

    /// Deletes every message of the group if `requester` is its author and
    /// the window is still open. Returns whether a retraction happened.
    pub async fn try_retract(&self, primary: MessageId, requester: UserId) -> bool {
        let Some((_, group)) = self
            .inner
            .groups
            .remove_if(&primary, |_, group| group.author_id == requester)
        else {
            return false;
        };

        tracing::info!(
            message_id = primary,
            author_id = requester,
            messages = group.messages.len(),
            "Retracting preview"
        );

        for message in group.messages {
            match self.inner.chat.delete_message(message).await {
                Ok(()) | Err(ChatError::NotFound) => {}
                Err(e) => {
                    tracing::warn!(message_id = message.id, error = %e, "Failed to delete preview message");
                }
            }
        }
        true
    }

    /// Closes the window for a group and removes the affordance. Returns
    /// whether the group was still registered.
    pub async fn expire(&self, primary: MessageId) -> bool {
        let Some((_, group)) = self.inner.groups.remove(&primary) else {
            return false;
        };
        let Some(message) = group.primary() else {
            return true;
        };

        match self.inner.chat.remove_reaction(message, self.emoji()).await {
            Ok(()) => {}
            // Deleted by hand in the meantime
            Err(ChatError::NotFound) => {
                tracing::debug!(message_id = primary, "Preview already gone at expiry");
            }
            Err(e) => {
                tracing::warn!(message_id = primary, error = %e, "Failed to remove retraction reaction");
            }
        }
        true
    }

    pub fn is_registered(&self, primary: MessageId) -> bool {
        self.inner.groups.contains_key(&primary)
    }

    pub fn len(&self) -> usize {
        self.inner.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.groups.is_empty()
    }
}

impl fmt::Debug for PreviewRetractionTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviewRetractionTracker")
            .field("groups", &self.inner.groups.len())
            .field("settings", &self.inner.settings)
            .finish()
    }
}

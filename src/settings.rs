//! Persistent feed configuration and cursors.
//!
//! Storage itself belongs to an external collaborator; the relay only sees
//! [`SettingsStore`], whose `modify` is an atomic read-modify-write. Feed
//! cursors are never written any other way, so a concurrent edit (a feed
//! removed by a command while a poll cycle runs) is never clobbered.
//!
//! Preview preferences live here too: per server ([`MediaSettings`]) and per
//! user ([`UserMediaSettings`]).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::chat::{ChannelId, ServerId, UserId};
use crate::preview::PreviewStyle;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Settings storage unavailable: {0}")]
    Unavailable(String),
}

/// A board being watched for new posts, plus how far it has been relayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedCursor {
    pub feed_id: u64,
    /// Community (cafe) the board belongs to
    pub source_id: String,
    pub board_id: String,
    pub target_channel: ChannelId,
    /// Highest sequence number already relayed; `None` until first seen
    #[serde(default)]
    pub last_processed_sequence: Option<u64>,
    /// Credential used to read members-only boards
    #[serde(default)]
    pub credential_ref: Option<String>,
}

impl FeedCursor {
    pub fn new(
        feed_id: u64,
        source_id: impl Into<String>,
        board_id: impl Into<String>,
        target_channel: ChannelId,
    ) -> Self {
        Self {
            feed_id,
            source_id: source_id.into(),
            board_id: board_id.into(),
            target_channel,
            last_processed_sequence: None,
            credential_ref: None,
        }
    }
}

/// Per-server media settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSettings {
    pub server_id: ServerId,
    #[serde(default)]
    pub feeds: Vec<FeedCursor>,
    /// Preview every post link anyone shares on the server
    #[serde(default)]
    pub auto_previews: bool,
    /// Server default for automatic previews; users may override it
    #[serde(default)]
    pub preview_style: Option<PreviewStyle>,
}

impl MediaSettings {
    pub fn new(server_id: ServerId) -> Self {
        Self {
            server_id,
            ..Self::default()
        }
    }

    pub fn feed_mut(&mut self, feed_id: u64) -> Option<&mut FeedCursor> {
        self.feeds.iter_mut().find(|f| f.feed_id == feed_id)
    }
}

/// A user's personal preview preferences, applied on every server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMediaSettings {
    pub user_id: UserId,
    /// Preview post links this user shares, whatever the server says
    #[serde(default)]
    pub auto_previews: bool,
    #[serde(default)]
    pub preview_style: Option<PreviewStyle>,
}

impl UserMediaSettings {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            ..Self::default()
        }
    }
}

pub type SettingsMutation = Box<dyn FnOnce(&mut MediaSettings) + Send>;

pub type UserSettingsMutation = Box<dyn FnOnce(&mut UserMediaSettings) + Send>;

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn read(&self, server_id: ServerId) -> Result<Option<MediaSettings>, SettingsError>;

    async fn read_all(&self) -> Result<Vec<MediaSettings>, SettingsError>;

    /// Applies `mutate` atomically, creating default settings if absent.
    async fn modify(
        &self,
        server_id: ServerId,
        mutate: SettingsMutation,
    ) -> Result<(), SettingsError>;

    async fn read_user(&self, user_id: UserId)
        -> Result<Option<UserMediaSettings>, SettingsError>;

    /// Like `modify`, for a user's settings.
    async fn modify_user(
        &self,
        user_id: UserId,
        mutate: UserSettingsMutation,
    ) -> Result<(), SettingsError>;
}

/// In-process store, for tests and single-binary setups without a database.
#[derive(Debug, Default)]
pub struct MemorySettings {
    servers: Mutex<BTreeMap<ServerId, MediaSettings>>,
    users: Mutex<BTreeMap<UserId, UserMediaSettings>>,
}

impl MemorySettings {
    pub fn new(settings: impl IntoIterator<Item = MediaSettings>) -> Self {
        Self {
            servers: Mutex::new(settings.into_iter().map(|s| (s.server_id, s)).collect()),
            users: Mutex::new(BTreeMap::new()),
        }
    }

    pub async fn feed(&self, server_id: ServerId, feed_id: u64) -> Option<FeedCursor> {
        self.servers
            .lock()
            .await
            .get(&server_id)
            .and_then(|s| s.feeds.iter().find(|f| f.feed_id == feed_id).cloned())
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn read(&self, server_id: ServerId) -> Result<Option<MediaSettings>, SettingsError> {
        Ok(self.servers.lock().await.get(&server_id).cloned())
    }

    async fn read_all(&self) -> Result<Vec<MediaSettings>, SettingsError> {
        Ok(self.servers.lock().await.values().cloned().collect())
    }

    async fn modify(
        &self,
        server_id: ServerId,
        mutate: SettingsMutation,
    ) -> Result<(), SettingsError> {
        let mut servers = self.servers.lock().await;
        let settings = servers
            .entry(server_id)
            .or_insert_with(|| MediaSettings::new(server_id));
        mutate(settings);
        Ok(())
    }

    async fn read_user(
        &self,
        user_id: UserId,
    ) -> Result<Option<UserMediaSettings>, SettingsError> {
        Ok(self.users.lock().await.get(&user_id).cloned())
    }

    async fn modify_user(
        &self,
        user_id: UserId,
        mutate: UserSettingsMutation,
    ) -> Result<(), SettingsError> {
        let mut users = self.users.lock().await;
        mutate(
            users
                .entry(user_id)
                .or_insert_with(|| UserMediaSettings::new(user_id)),
        );
        Ok(())
    }
}

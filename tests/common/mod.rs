//! Shared fakes for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use url::Url;

use feedrelay::chat::{
    ChatClient, ChatError, Destination, MessageId, OutgoingMessage, SentMessage, UserId,
};
use feedrelay::feed::{
    AnonymousAuthenticator, ContentSource, FeedPoller, MemoryCredentials, PageMetadata,
    PollerSettings, PostLinks, Session, SourceError,
};
use feedrelay::fetch::{
    BlacklistPolicy, LoginWallClassifier, ReqwestTransport, ResilientFetcher, RetryLimits,
};
use feedrelay::proxy::{ProxyPool, StaticProxyList};
use feedrelay::settings::{FeedCursor, MediaSettings, MemorySettings};

pub const BOT_ID: UserId = 1;
pub const SERVER: u64 = 100;
pub const CHANNEL: u64 = 200;

pub fn destination() -> Destination {
    Destination::new(SERVER, CHANNEL)
}

// ============================================================================
// Chat
// ============================================================================

#[derive(Default)]
pub struct ChatState {
    pub sent: Vec<(SentMessage, OutgoingMessage)>,
    pub deleted: Vec<MessageId>,
    pub reactions: Vec<(MessageId, String)>,
    pub removed_reactions: Vec<MessageId>,
    pub missing_destinations: HashSet<Destination>,
    /// Sends allowed before posting permission is revoked; `None` = unlimited
    pub send_allowance: Option<usize>,
    /// Error returned by the next `send_message`
    pub next_send_error: Option<ChatError>,
    pub reaction_error: Option<ChatError>,
    pub delete_error: Option<ChatError>,
}

pub struct FakeChat {
    next_id: AtomicU64,
    pub state: Mutex<ChatState>,
}

impl FakeChat {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1000),
            state: Mutex::new(ChatState::default()),
        })
    }

    pub fn with_state(&self, f: impl FnOnce(&mut ChatState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter_map(|(_, m)| m.text.clone())
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.state.lock().unwrap().sent.len()
    }

    pub fn deleted(&self) -> Vec<MessageId> {
        self.state.lock().unwrap().deleted.clone()
    }
}

#[async_trait]
impl ChatClient for FakeChat {
    fn current_user(&self) -> UserId {
        BOT_ID
    }

    async fn destination_exists(&self, destination: Destination) -> bool {
        !self
            .state
            .lock()
            .unwrap()
            .missing_destinations
            .contains(&destination)
    }

    async fn can_send(&self, _destination: Destination) -> bool {
        self.state.lock().unwrap().send_allowance != Some(0)
    }

    async fn send_message(
        &self,
        destination: Destination,
        message: OutgoingMessage,
    ) -> Result<Vec<SentMessage>, ChatError> {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.next_send_error.take() {
            return Err(e);
        }
        match state.send_allowance {
            Some(0) => return Err(ChatError::PermissionDenied("send messages".into())),
            Some(ref mut n) => *n -= 1,
            None => {}
        }
        let sent = SentMessage {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            destination,
        };
        state.sent.push((sent, message));
        Ok(vec![sent])
    }

    async fn delete_message(&self, message: SentMessage) -> Result<(), ChatError> {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.delete_error.clone() {
            return Err(e);
        }
        state.deleted.push(message.id);
        Ok(())
    }

    async fn add_reaction(&self, message: SentMessage, emoji: &str) -> Result<(), ChatError> {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.reaction_error.clone() {
            return Err(e);
        }
        state.reactions.push((message.id, emoji.to_string()));
        Ok(())
    }

    async fn remove_reaction(&self, message: SentMessage, _emoji: &str) -> Result<(), ChatError> {
        self.state.lock().unwrap().removed_reactions.push(message.id);
        Ok(())
    }
}

// ============================================================================
// Board source
// ============================================================================

#[derive(Default)]
pub struct FakeSource {
    latest: Mutex<HashMap<String, u64>>,
    failing_boards: Mutex<HashSet<String>>,
    pub metadata_fails: AtomicBool,
    /// When set, `latest_sequence` waits for a notification first
    pub gate: Option<Arc<Notify>>,
    /// Calls to `latest_sequence` that reached the gate
    pub gate_waiters: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gated(gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            gate: Some(gate),
            ..Self::default()
        })
    }

    pub fn set_latest(&self, board_id: &str, latest: u64) {
        self.latest
            .lock()
            .unwrap()
            .insert(board_id.to_string(), latest);
    }

    /// Waits until a cycle is parked at the gate, past its settings read.
    pub async fn wait_at_gate(&self) {
        while self.gate_waiters.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    }

    pub fn fail_board(&self, board_id: &str) {
        self.failing_boards
            .lock()
            .unwrap()
            .insert(board_id.to_string());
    }
}

pub fn canonical_link(board_id: &str, sequence: u64) -> String {
    format!("<https://view.test/cafe/{board_id}/{sequence}>")
}

#[async_trait]
impl ContentSource for FakeSource {
    fn name(&self) -> &str {
        "Test Board"
    }

    fn post_links(
        &self,
        source_id: &str,
        board_id: &str,
        sequence: u64,
    ) -> Result<PostLinks, SourceError> {
        Ok(PostLinks {
            fetch_url: Url::parse(&format!(
                "https://board.test/{source_id}/{board_id}/{sequence}"
            ))
            .unwrap(),
            canonical_url: Url::parse(&format!(
                "https://view.test/{source_id}/{board_id}/{sequence}"
            ))
            .unwrap(),
        })
    }

    async fn latest_sequence(
        &self,
        _session: &Session,
        _source_id: &str,
        board_id: &str,
    ) -> Result<u64, SourceError> {
        if let Some(gate) = &self.gate {
            self.gate_waiters.fetch_add(1, Ordering::SeqCst);
            gate.notified().await;
        }
        if self.failing_boards.lock().unwrap().contains(board_id) {
            return Err(SourceError::Parse("board unavailable".into()));
        }
        self.latest
            .lock()
            .unwrap()
            .get(board_id)
            .copied()
            .ok_or_else(|| SourceError::Parse("no posts".into()))
    }

    async fn page_metadata(
        &self,
        _session: &Session,
        url: &Url,
    ) -> Result<PageMetadata, SourceError> {
        if self.metadata_fails.load(Ordering::SeqCst) {
            return Err(SourceError::Parse("post unavailable".into()));
        }
        let sequence = url.path_segments().and_then(|s| s.last()).unwrap_or("?");
        Ok(PageMetadata {
            kind: Some("article".into()),
            title: Some(format!("Post {sequence}")),
            description: Some(format!("Body of post {sequence}")),
            image_url: None,
            body: None,
        })
    }
}

// ============================================================================
// Wiring
// ============================================================================

pub fn feed(feed_id: u64, board_id: &str, cursor: Option<u64>) -> FeedCursor {
    let mut feed = FeedCursor::new(feed_id, "cafe", board_id, CHANNEL);
    feed.last_processed_sequence = cursor;
    feed
}

pub fn store(feeds: Vec<FeedCursor>) -> Arc<MemorySettings> {
    Arc::new(MemorySettings::new([MediaSettings {
        feeds,
        ..MediaSettings::new(SERVER)
    }]))
}

pub fn poller(
    store: Arc<MemorySettings>,
    chat: Arc<FakeChat>,
    source: Arc<FakeSource>,
) -> FeedPoller {
    poller_with_credentials(store, chat, source, MemoryCredentials::default())
}

/// Logins are always refused, so credentialed feeds read anonymously.
pub fn poller_with_credentials(
    store: Arc<MemorySettings>,
    chat: Arc<FakeChat>,
    source: Arc<FakeSource>,
    credentials: MemoryCredentials,
) -> FeedPoller {
    FeedPoller::new(
        PollerSettings::default(),
        store,
        chat,
        source,
        Arc::new(AnonymousAuthenticator),
        Arc::new(credentials),
    )
}

/// A fetcher whose only proxy is the given mock server.
pub async fn fetcher_via(proxy_uri: &str) -> ResilientFetcher {
    let proxy = Url::parse(proxy_uri).unwrap();
    let pool = Arc::new(ProxyPool::new(Arc::new(StaticProxyList::new(vec![proxy]))));
    pool.refresh().await.unwrap();
    ResilientFetcher::new(
        pool,
        Arc::new(ReqwestTransport::new(
            "feedrelay-test",
            Duration::from_secs(5),
        )),
        Arc::new(LoginWallClassifier::default()),
        BlacklistPolicy::default(),
        RetryLimits::default(),
    )
}

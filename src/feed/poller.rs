use anyhow::Context;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::preview::render_post;
use super::session::{Session, SessionCache};
use super::source::{Authenticator, ContentSource, CredentialStore};
use crate::chat::{ChatClient, ChatError, Destination, OutgoingMessage, ServerId};
use crate::settings::{FeedCursor, SettingsStore};
use crate::util::catch_task_panic;

/// Scheduling knobs for the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerSettings {
    pub interval: Duration,
    pub session_ttl: Duration,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            session_ttl: Duration::from_secs(60 * 60),
        }
    }
}

/// Outcome of one pass over every configured feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub feeds_checked: usize,
    pub posts_delivered: usize,
    pub feeds_failed: usize,
}

/// Periodically relays new board posts into their target channels.
///
/// At most one cycle runs at a time; a trigger that lands while a cycle is
/// in flight is dropped rather than queued. Within a cycle feeds are handled
/// one after another, and posts within a feed in ascending sequence order.
#[derive(Clone)]
pub struct FeedPoller {
    inner: Arc<Inner>,
}

struct Inner {
    schedule: PollerSettings,
    settings: Arc<dyn SettingsStore>,
    chat: Arc<dyn ChatClient>,
    source: Arc<dyn ContentSource>,
    sessions: SessionCache,
    running: AtomicBool,
}

/// Holds the single-flight flag; releases it even if the cycle panics.
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl FeedPoller {
    /// Sessions for credentialed feeds are logged in through
    /// `authenticator` and cached for `schedule.session_ttl`.
    pub fn new(
        schedule: PollerSettings,
        settings: Arc<dyn SettingsStore>,
        chat: Arc<dyn ChatClient>,
        source: Arc<dyn ContentSource>,
        authenticator: Arc<dyn Authenticator>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                schedule,
                settings,
                chat,
                source,
                sessions: SessionCache::new(authenticator, credentials, schedule.session_ttl),
                running: AtomicBool::new(false),
            }),
        }
    }

    pub fn settings(&self) -> PollerSettings {
        self.inner.schedule
    }

    /// Starts the recurring trigger. The first cycle runs one interval from now.
    pub fn start(&self) -> JoinHandle<()> {
        let poller = self.clone();
        let interval = self.inner.schedule.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                // Detached so a long cycle never delays the next tick
                poller.trigger();
            }
        })
    }

    /// Runs a cycle in the background. Returns `None` in the handle's output
    /// when another cycle was already running.
    pub fn trigger(&self) -> JoinHandle<Option<CycleReport>> {
        let poller = self.clone();
        tokio::spawn(async move { poller.run_cycle().await })
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Runs one cycle inline, or returns `None` if one is already running.
    pub async fn run_cycle(&self) -> Option<CycleReport> {
        let Some(_guard) = CycleGuard::acquire(&self.inner.running) else {
            tracing::debug!("Feed update already in progress, skipping trigger");
            return None;
        };

        let started = Instant::now();
        let report = match catch_task_panic(self.inner.update_all()).await {
            Ok(report) => report,
            Err(panic) => {
                tracing::error!(panic = %panic, "Feed update cycle panicked");
                CycleReport::default()
            }
        };

        tracing::info!(
            feeds = report.feeds_checked,
            delivered = report.posts_delivered,
            failed = report.feeds_failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Finished feed update cycle"
        );
        Some(report)
    }
}

impl Inner {
    async fn update_all(&self) -> CycleReport {
        let mut report = CycleReport::default();

        let all = match self.settings.read_all().await {
            Ok(all) => all,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read feed settings");
                return report;
            }
        };

        for settings in all {
            for feed in &settings.feeds {
                report.feeds_checked += 1;
                match self.update_feed(settings.server_id, feed).await {
                    Ok(delivered) => report.posts_delivered += delivered,
                    Err(e) => {
                        report.feeds_failed += 1;
                        tracing::error!(
                            server_id = settings.server_id,
                            feed_id = feed.feed_id,
                            source_id = %feed.source_id,
                            board_id = %feed.board_id,
                            error = %format!("{e:#}"),
                            "Failed to update feed"
                        );
                    }
                }
            }
        }

        report
    }

    /// Relays posts newer than the feed's cursor. Returns how many were sent.
    async fn update_feed(&self, server_id: ServerId, feed: &FeedCursor) -> anyhow::Result<usize> {
        let destination = Destination::new(server_id, feed.target_channel);
        if !self.chat.destination_exists(destination).await {
            tracing::debug!(
                server_id,
                channel_id = feed.target_channel,
                feed_id = feed.feed_id,
                "Target channel is gone, skipping feed"
            );
            return Ok(0);
        }

        let session = self
            .sessions
            .resolve(feed.credential_ref.as_deref())
            .await
            .context("Failed to resolve session")?;

        let latest = self
            .source
            .latest_sequence(&session, &feed.source_id, &feed.board_id)
            .await
            .context("Failed to read latest post")?;

        let Some(cursor) = feed.last_processed_sequence else {
            self.initialize_cursor(server_id, feed.feed_id, latest).await?;
            tracing::info!(
                server_id,
                feed_id = feed.feed_id,
                latest,
                "Initialized feed cursor"
            );
            return Ok(0);
        };

        if latest <= cursor {
            return Ok(0);
        }

        let mut last_delivered = cursor;
        let mut failure = None;
        for sequence in (cursor + 1)..=latest {
            if !self.chat.can_send(destination).await {
                tracing::info!(
                    server_id,
                    channel_id = feed.target_channel,
                    feed_id = feed.feed_id,
                    "Lost permission to post in target channel"
                );
                break;
            }

            let message = match self.render(&session, feed, sequence).await {
                Ok(message) => message,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };
            match self.chat.send_message(destination, message).await {
                Ok(_) => last_delivered = sequence,
                Err(ChatError::PermissionDenied(reason)) => {
                    tracing::info!(
                        server_id,
                        feed_id = feed.feed_id,
                        reason = %reason,
                        "Lost permission to post in target channel"
                    );
                    break;
                }
                Err(e) => {
                    failure = Some(
                        anyhow::Error::new(e).context(format!("Failed to deliver post {sequence}")),
                    );
                    break;
                }
            }
        }

        if last_delivered > cursor {
            self.advance_cursor(server_id, feed.feed_id, last_delivered)
                .await?;
            tracing::info!(
                server_id,
                feed_id = feed.feed_id,
                from = cursor,
                to = last_delivered,
                "Relayed new posts"
            );
        }

        match failure {
            Some(e) => Err(e),
            None => Ok((last_delivered - cursor) as usize),
        }
    }

    async fn render(
        &self,
        session: &Session,
        feed: &FeedCursor,
        sequence: u64,
    ) -> anyhow::Result<OutgoingMessage> {
        let links = self
            .source
            .post_links(&feed.source_id, &feed.board_id, sequence)
            .context("Failed to build post link")?;

        let metadata = match self.source.page_metadata(session, &links.fetch_url).await {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                tracing::warn!(
                    feed_id = feed.feed_id,
                    sequence,
                    error = %e,
                    "Failed to fetch post metadata, sending bare link"
                );
                None
            }
        };

        Ok(render_post(
            self.source.name(),
            &feed.source_id,
            &links,
            metadata.as_ref(),
        ))
    }

    /// Sets the cursor only if it is still unset.
    async fn initialize_cursor(
        &self,
        server_id: ServerId,
        feed_id: u64,
        latest: u64,
    ) -> anyhow::Result<()> {
        self.settings
            .modify(
                server_id,
                Box::new(move |settings| {
                    if let Some(feed) = settings.feed_mut(feed_id) {
                        feed.last_processed_sequence.get_or_insert(latest);
                    }
                }),
            )
            .await
            .context("Failed to save feed cursor")
    }

    /// Moves the cursor forward; never backward.
    async fn advance_cursor(
        &self,
        server_id: ServerId,
        feed_id: u64,
        sequence: u64,
    ) -> anyhow::Result<()> {
        self.settings
            .modify(
                server_id,
                Box::new(move |settings| {
                    if let Some(feed) = settings.feed_mut(feed_id) {
                        let current = feed.last_processed_sequence.unwrap_or(0);
                        feed.last_processed_sequence = Some(current.max(sequence));
                    }
                }),
            )
            .await
            .context("Failed to save feed cursor")
    }
}

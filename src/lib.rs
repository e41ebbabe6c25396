//! Resilient content ingestion for a chat bot.
//!
//! Two paths feed content into chat channels:
//!
//! - [`feed`] polls watched community boards and relays new posts.
//! - [`preview`] answers post links shared in chat with rich previews that
//!   the requester can retract for a short while.
//!
//! Both fetch through [`fetch::ResilientFetcher`], which rotates requests over
//! a [`proxy::ProxyPool`] and benches proxies the origin has blocked. Chat
//! delivery and settings storage are collaborators behind the
//! [`chat::ChatClient`] and [`settings::SettingsStore`] traits.

pub mod chat;
pub mod config;
pub mod feed;
pub mod fetch;
pub mod preview;
pub mod proxy;
pub mod settings;
pub mod util;

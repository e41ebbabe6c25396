//! Previews for post links shared in chat.
//!
//! - [`links`] - Finding post links in message text
//! - [`post`] - Parsing a post and rendering it as messages
//! - [`tracker`] - Short-lived "remove" affordance on sent previews
//! - [`service`] - Event entry points tying the above to the fetcher

mod links;
mod post;
mod service;
mod tracker;

pub use links::{extract_post_links, ExtractedLinks};
pub use post::{
    parse_media_post, post_request, render_media_post, MediaItem, MediaPost, PostError,
    PreviewStyle, QUERY_ENDPOINT,
};
pub use service::{
    InboundMessage, PreviewError, PreviewService, ReactionEvent, DEFAULT_COMMAND_PREFIX,
};
pub use tracker::{DeliveredPreviewGroup, PreviewRetractionTracker, TrackerSettings};

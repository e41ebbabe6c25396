//! Board feed polling: relays new posts from watched boards into channels.
//!
//! - [`source`] - Reading boards and post pages (`ContentSource`), plus the
//!   login and credential collaborators
//! - [`session`] - TTL cache of per-credential sessions
//! - [`preview`] - Rendering a post into an outgoing message
//! - [`poller`] - The single-flight update cycle and its schedule
//!
//! # Example
//!
//! ```ignore
//! use feedrelay::feed::{AnonymousAuthenticator, FeedPoller, HttpBoardSource};
//!
//! let poller = FeedPoller::new(
//!     config.poller_settings(),
//!     store,
//!     chat,
//!     Arc::new(source),
//!     Arc::new(AnonymousAuthenticator),
//!     credentials,
//! );
//! poller.start();
//! ```

mod poller;
mod preview;
mod session;
mod source;

pub use poller::{CycleReport, FeedPoller, PollerSettings};
pub use preview::render_post;
pub use session::{Session, SessionCache};
pub use source::{
    latest_post_sequence, parse_page_metadata, AnonymousAuthenticator, AuthError, Authenticator,
    BoardUrls, ContentSource, Credential, CredentialStore, HttpBoardSource, MemoryCredentials,
    PageMetadata, PostBody, PostLinks, SourceError,
};

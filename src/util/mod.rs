//! Utility functions shared across the relay.
//!
//! This module provides reusable utilities for:
//!
//! - **Text processing**: character-safe truncation and cleanup of
//!   externally sourced text before it is rendered into a chat message
//! - **Background tasks**: detached spawning with a panic/error logging boundary
//!
//! # Examples
//!
//! ```
//! use feedrelay::util::{collapse_blank_lines, truncate_chars};
//!
//! let cleaned = collapse_blank_lines("First\n\n\n\nSecond");
//! assert_eq!(cleaned, "First\n\nSecond");
//!
//! let short = truncate_chars("A rather long board post title", 12);
//! assert_eq!(short, "A rather...");
//! ```

mod task;
mod text;

pub use task::{catch_task_panic, spawn_logged};
pub use text::{collapse_blank_lines, neutralize_mentions, truncate_chars, truncate_lines};

/// Maximum length of a single chat message, in characters
pub const MAX_MESSAGE_CHARS: usize = 2000;

use regex::Regex;
use std::sync::OnceLock;

fn post_link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)https?://(?:www\.)?instagram\.com/(?:p|tv|reel)/([^/?#>\s]+)")
            .expect("post link regex is valid")
    })
}

fn quoted_link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)<https?://(?:www\.)?instagram\.com/(?:p|tv|reel)/[^/?#>\s]+[^>\s]*>")
            .expect("quoted link regex is valid")
    })
}

/// Post ids found in a chat message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedLinks {
    /// Unique shortcodes in order of first appearance
    pub shortcodes: Vec<String>,
    /// Whether any link was posted without `<...>`, i.e. the platform will
    /// render its own (usually poor) embed for it
    pub unquoted: bool,
}

impl ExtractedLinks {
    pub fn is_empty(&self) -> bool {
        self.shortcodes.is_empty()
    }
}

/// Finds post links in `content`, keeping at most `limit` distinct posts.
pub fn extract_post_links(content: &str, limit: usize) -> ExtractedLinks {
    let mut shortcodes: Vec<String> = Vec::new();
    let mut total = 0;

    for caps in post_link_regex().captures_iter(content) {
        total += 1;
        let Some(code) = caps.get(1).map(|m| m.as_str()) else {
            continue;
        };
        if shortcodes.len() < limit && !shortcodes.iter().any(|c| c == code) {
            shortcodes.push(code.to_string());
        }
    }

    let quoted = quoted_link_regex().find_iter(content).count();

    ExtractedLinks {
        shortcodes,
        unquoted: total > quoted,
    }
}

//! Turns a board post into the message relayed to a channel.

use super::source::{PageMetadata, PostLinks};
use crate::chat::{Embed, OutgoingMessage};
use crate::util::{collapse_blank_lines, neutralize_mentions, truncate_chars, truncate_lines};

const DESCRIPTION_MAX_LINES: usize = 13;
const DESCRIPTION_MAX_CHARS: usize = 350;

/// Generic share images the site substitutes when a post has none.
const PLACEHOLDER_IMAGES: &[&str] = &["cafe_meta_image.png"];

/// Builds the preview for one post.
///
/// The message text is always the canonical link in angle brackets, so the
/// platform never unfurls it on its own. An embed is attached only when the
/// metadata has enough to show; otherwise the link goes out bare.
pub fn render_post(
    source_name: &str,
    source_id: &str,
    links: &PostLinks,
    metadata: Option<&PageMetadata>,
) -> OutgoingMessage {
    let message = OutgoingMessage::text(format!("<{}>", links.canonical_url));

    let Some((title, description, image)) = metadata.and_then(pick_content) else {
        return message;
    };

    message.with_embed(Embed {
        title: Some(neutralize_mentions(&title).into_owned()),
        url: Some(links.canonical_url.to_string()),
        description: description.as_deref().map(clean_description),
        image_url: image,
        footer: Some(format!("{source_name} • {source_id}")),
        ..Embed::default()
    })
}

type Content = (String, Option<String>, Option<String>);

fn pick_content(metadata: &PageMetadata) -> Option<Content> {
    let body = metadata.body.clone().unwrap_or_default();
    let body_image = body.image_url.and_then(usable_image);
    let body_text = body.text.filter(|t| !t.trim().is_empty());
    let has_body = body_text.is_some() || body_image.is_some();

    if metadata.kind.as_deref() == Some("comment") && has_body {
        return Some(("New memo".to_string(), body_text, body_image));
    }

    if let Some(subject) = body.subject.filter(|s| !s.trim().is_empty()) {
        if has_body {
            return Some((subject, body_text, body_image));
        }
    }

    if metadata.kind.as_deref() == Some("article") {
        let title = metadata.title.clone().filter(|t| !t.trim().is_empty())?;
        let description = metadata.description.clone().filter(|d| !d.trim().is_empty());
        let image = metadata.image_url.clone().and_then(usable_image);
        if description.is_some() || image.is_some() {
            return Some((title, description, image));
        }
    }

    None
}

fn usable_image(url: String) -> Option<String> {
    if url.trim().is_empty() || PLACEHOLDER_IMAGES.iter().any(|p| url.contains(p)) {
        None
    } else {
        Some(url)
    }
}

fn clean_description(text: &str) -> String {
    let collapsed = collapse_blank_lines(text);
    let lines = truncate_lines(&collapsed, DESCRIPTION_MAX_LINES);
    let capped = truncate_chars(&lines, DESCRIPTION_MAX_CHARS);
    neutralize_mentions(&capped).into_owned()
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::chat::{Embed, OutgoingMessage};
use crate::fetch::FetchRequest;
use crate::util::{neutralize_mentions, truncate_chars, MAX_MESSAGE_CHARS};

/// Public GraphQL endpoint serving post data.
pub const QUERY_ENDPOINT: &str = "https://www.instagram.com/graphql/query/";

const QUERY_HASH: &str = "505f2f2dfcfce5b99cb7ac4155cbf299";

/// Media links listed in an embed before the rest are left out
const EMBED_MEDIA_CUTOFF: usize = 5;

const EMBED_CAPTION_MAX_CHARS: usize = 1000;

#[derive(Debug, Error)]
pub enum PostError {
    #[error("Invalid post data: {0}")]
    Json(#[from] serde_json::Error),
    /// The response parsed but carried no post (deleted, private, or a
    /// login page served as JSON)
    #[error("Post data is missing")]
    MissingMedia,
    #[error("Invalid post request: {0}")]
    InvalidRequest(String),
}

/// Display style for a post preview.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewStyle {
    /// One rich embed card
    #[default]
    Embed,
    /// Plain messages that let the platform unfurl each media URL
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    /// Video URL for videos, full image otherwise
    pub url: String,
    pub is_video: bool,
    pub thumbnail: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPost {
    pub shortcode: String,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub caption: Option<String>,
    pub taken_at: Option<DateTime<Utc>>,
    pub media: Vec<MediaItem>,
}

impl MediaPost {
    pub fn url(&self) -> String {
        format!("https://instagram.com/p/{}/", self.shortcode)
    }

    /// Full name when set, otherwise the username.
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or(self.username.as_deref())
            .unwrap_or("Instagram")
    }
}

/// Builds the GraphQL request for a post against `endpoint`.
pub fn post_request(endpoint: &str, shortcode: &str) -> Result<FetchRequest, PostError> {
    let variables = serde_json::json!({
        "shortcode": shortcode,
        "child_comment_count": 3,
        "fetch_comment_count": 40,
        "parent_comment_count": 24,
        "has_threaded_comments": true,
    });
    let variables = variables.to_string();
    let url = Url::parse_with_params(
        endpoint,
        &[("query_hash", QUERY_HASH), ("variables", variables.as_str())],
    )
    .map_err(|e| PostError::InvalidRequest(format!("{endpoint}: {e}")))?;

    Ok(FetchRequest::get(url)
        .header("Accept", "*/*")
        .header("Referer", format!("https://www.instagram.com/p/{shortcode}/")))
}

#[derive(Deserialize)]
struct Root {
    data: Option<Data>,
}

#[derive(Deserialize)]
struct Data {
    shortcode_media: Option<MediaNode>,
}

#[derive(Deserialize)]
struct MediaNode {
    #[serde(default)]
    is_video: bool,
    video_url: Option<String>,
    display_url: Option<String>,
    owner: Option<Owner>,
    edge_media_to_caption: Option<Edges<CaptionNode>>,
    taken_at_timestamp: Option<i64>,
    edge_sidecar_to_children: Option<Edges<ChildNode>>,
}

#[derive(Deserialize, Default)]
struct ChildNode {
    #[serde(default)]
    is_video: bool,
    video_url: Option<String>,
    display_url: Option<String>,
}

#[derive(Deserialize)]
struct Owner {
    username: Option<String>,
    full_name: Option<String>,
    profile_pic_url: Option<String>,
}

#[derive(Deserialize)]
struct Edges<T> {
    #[serde(default)]
    edges: Vec<Edge<T>>,
}

#[derive(Deserialize)]
struct Edge<T> {
    node: Option<T>,
}

#[derive(Deserialize, Default)]
struct CaptionNode {
    text: Option<String>,
}

fn media_item(is_video: bool, video_url: Option<String>, display_url: Option<String>) -> Option<MediaItem> {
    let thumbnail = display_url?;
    let url = if is_video {
        video_url.unwrap_or_else(|| thumbnail.clone())
    } else {
        thumbnail.clone()
    };
    Some(MediaItem {
        url,
        is_video,
        thumbnail,
    })
}

/// Parses the GraphQL response for a post.
pub fn parse_media_post(shortcode: &str, json: &str) -> Result<MediaPost, PostError> {
    let root: Root = serde_json::from_str(json)?;
    let node = root
        .data
        .and_then(|d| d.shortcode_media)
        .ok_or(PostError::MissingMedia)?;

    let media = match node.edge_sidecar_to_children {
        Some(children) => children
            .edges
            .into_iter()
            .filter_map(|e| e.node)
            .filter_map(|c| media_item(c.is_video, c.video_url, c.display_url))
            .collect(),
        None => media_item(node.is_video, node.video_url, node.display_url)
            .into_iter()
            .collect(),
    };

    let caption = node
        .edge_media_to_caption
        .and_then(|c| c.edges.into_iter().next())
        .and_then(|e| e.node)
        .and_then(|n| n.text)
        .filter(|t| !t.trim().is_empty());

    let (username, full_name, avatar_url) = match node.owner {
        Some(o) => (o.username, o.full_name, o.profile_pic_url),
        None => (None, None, None),
    };

    Ok(MediaPost {
        shortcode: shortcode.to_string(),
        username,
        full_name,
        avatar_url,
        caption,
        taken_at: node
            .taken_at_timestamp
            .and_then(|ts| DateTime::from_timestamp(ts, 0)),
        media,
    })
}

/// Renders a post as one or more outgoing messages.
pub fn render_media_post(post: &MediaPost, style: PreviewStyle) -> Vec<OutgoingMessage> {
    match style {
        PreviewStyle::Embed => vec![render_embed(post)],
        PreviewStyle::Text => render_text(post),
    }
}

fn render_embed(post: &MediaPost) -> OutgoingMessage {
    let mut description = post
        .caption
        .as_deref()
        .map(|c| truncate_chars(&neutralize_mentions(c), EMBED_CAPTION_MAX_CHARS).into_owned())
        .unwrap_or_default();

    if post.media.len() > 1 || post.media.iter().any(|m| m.is_video) {
        let links = post
            .media
            .iter()
            .take(EMBED_MEDIA_CUTOFF)
            .enumerate()
            .map(|(i, m)| format!("[{}]({})", i + 1, m.url))
            .collect::<Vec<_>>()
            .join(" ");
        if !description.is_empty() {
            description.push_str("\n\n");
        }
        description.push_str(&links);
        if post.media.len() > EMBED_MEDIA_CUTOFF {
            description.push_str(&format!(" +{}", post.media.len() - EMBED_MEDIA_CUTOFF));
        }
    }

    OutgoingMessage {
        text: None,
        embed: Some(Embed {
            title: None,
            url: Some(post.url()),
            description: (!description.is_empty()).then_some(description),
            image_url: post.media.first().map(|m| m.thumbnail.clone()),
            thumbnail_url: None,
            author_name: Some(post.display_name().to_string()),
            author_icon_url: post.avatar_url.clone(),
            footer: post.username.as_ref().map(|u| format!("@{u}")),
            timestamp: post.taken_at,
        }),
    }
}

/// Header, caption and link first, then one media URL per line, packed into
/// messages that fit the platform limit.
fn render_text(post: &MediaPost) -> Vec<OutgoingMessage> {
    let mut lines = vec![format!("**{}**", post.display_name())];
    if let Some(caption) = &post.caption {
        lines.extend(neutralize_mentions(caption).lines().map(|l| format!("> {l}")));
    }
    lines.push(format!("<{}>", post.url()));
    lines.extend(post.media.iter().map(|m| m.url.clone()));

    let mut messages = Vec::new();
    let mut current = String::new();
    for line in lines {
        let line = truncate_chars(&line, MAX_MESSAGE_CHARS).into_owned();
        let separator = usize::from(!current.is_empty());
        if separator > 0
            && current.chars().count() + separator + line.chars().count() > MAX_MESSAGE_CHARS
        {
            messages.push(OutgoingMessage::text(std::mem::take(&mut current)));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(&line);
    }
    if !current.is_empty() {
        messages.push(OutgoingMessage::text(current));
    }
    messages
}

use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::sync::OnceLock;
use thiserror::Error;
use url::Url;

use super::session::Session;
use crate::fetch::{FetchError, FetchRequest, ResilientFetcher};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The page did not contain what was expected
    #[error("Unexpected page content: {0}")]
    Parse(String),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// The site refuses logins from the proxy's region
    #[error("Login blocked in this country")]
    CountryBlocked,
    #[error("Login failed")]
    LoginFailed,
    #[error("Unknown credential: {0}")]
    UnknownCredential(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{0}")]
    Other(String),
}

/// Login name and password for a board site account.
#[derive(Debug)]
pub struct Credential {
    pub login: String,
    pub password: SecretString,
}

/// Resolves credential references stored in feed settings.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn credential(&self, credential_ref: &str) -> Result<Credential, AuthError>;
}

/// Logs in to a board site.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn create_session(&self, credential: &Credential) -> Result<Session, AuthError>;
}

/// Authenticator for sites read without an account. Every login is
/// refused, so credentialed feeds fall back to anonymous sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousAuthenticator;

#[async_trait]
impl Authenticator for AnonymousAuthenticator {
    async fn create_session(&self, credential: &Credential) -> Result<Session, AuthError> {
        tracing::debug!(login = %credential.login, "No login flow configured");
        Err(AuthError::LoginFailed)
    }
}

/// In-process credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    entries: DashMap<String, (String, SecretString)>,
}

impl MemoryCredentials {
    pub fn insert(&self, credential_ref: &str, login: &str, password: &str) {
        self.entries.insert(
            credential_ref.to_string(),
            (login.to_string(), SecretString::from(password.to_string())),
        );
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentials {
    async fn credential(&self, credential_ref: &str) -> Result<Credential, AuthError> {
        let entry = self
            .entries
            .get(credential_ref)
            .ok_or_else(|| AuthError::UnknownCredential(credential_ref.to_string()))?;
        let (login, password) = entry.value();
        Ok(Credential {
            login: login.clone(),
            password: SecretString::from(password.expose_secret().to_string()),
        })
    }
}

/// Body of a board post, as opposed to the page's generic metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostBody {
    pub subject: Option<String>,
    pub text: Option<String>,
    pub image_url: Option<String>,
}

/// What a post page says about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMetadata {
    /// `og:type`, e.g. "article" or "comment"
    pub kind: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub body: Option<PostBody>,
}

/// Where a post is fetched from, and where readers should be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostLinks {
    pub fetch_url: Url,
    pub canonical_url: Url,
}

/// A board site the poller can watch.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Human-readable site name, shown in preview footers.
    fn name(&self) -> &str;

    fn post_links(
        &self,
        source_id: &str,
        board_id: &str,
        sequence: u64,
    ) -> Result<PostLinks, SourceError>;

    /// Highest post sequence number currently on the board.
    async fn latest_sequence(
        &self,
        session: &Session,
        source_id: &str,
        board_id: &str,
    ) -> Result<u64, SourceError>;

    async fn page_metadata(&self, session: &Session, url: &Url)
        -> Result<PageMetadata, SourceError>;
}

/// URL templates with `{source}`, `{board}` and `{sequence}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardUrls {
    pub board: String,
    pub post: String,
    pub canonical: String,
}

impl Default for BoardUrls {
    fn default() -> Self {
        Self {
            board: "https://m.cafe.daum.net/{source}/{board}".to_string(),
            post: "https://m.cafe.daum.net/{source}/{board}/{sequence}".to_string(),
            canonical: "https://cafe.daum.net/{source}/{board}/{sequence}".to_string(),
        }
    }
}

fn fill(template: &str, source_id: &str, board_id: &str, sequence: u64) -> Result<Url, SourceError> {
    let filled = template
        .replace("{source}", source_id)
        .replace("{board}", board_id)
        .replace("{sequence}", &sequence.to_string());
    Url::parse(&filled).map_err(|e| SourceError::InvalidUrl(format!("{filled}: {e}")))
}

/// Board site scraped over HTTP through the proxy pool.
pub struct HttpBoardSource {
    name: String,
    urls: BoardUrls,
    fetcher: ResilientFetcher,
}

impl HttpBoardSource {
    pub fn new(name: impl Into<String>, urls: BoardUrls, fetcher: ResilientFetcher) -> Self {
        Self {
            name: name.into(),
            urls,
            fetcher,
        }
    }

    async fn fetch_page(&self, session: &Session, url: Url) -> Result<String, SourceError> {
        let mut request = FetchRequest::get(url);
        if let Some(token) = session.token() {
            request = request.header("Cookie", token.expose_secret());
        }
        Ok(self.fetcher.fetch_with_retry(&request).await?)
    }
}

#[async_trait]
impl ContentSource for HttpBoardSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn post_links(
        &self,
        source_id: &str,
        board_id: &str,
        sequence: u64,
    ) -> Result<PostLinks, SourceError> {
        Ok(PostLinks {
            fetch_url: fill(&self.urls.post, source_id, board_id, sequence)?,
            canonical_url: fill(&self.urls.canonical, source_id, board_id, sequence)?,
        })
    }

    async fn latest_sequence(
        &self,
        session: &Session,
        source_id: &str,
        board_id: &str,
    ) -> Result<u64, SourceError> {
        let url = fill(&self.urls.board, source_id, board_id, 0)?;
        let html = self.fetch_page(session, url).await?;
        latest_post_sequence(&html, source_id, board_id)?.ok_or_else(|| {
            SourceError::Parse(format!("no posts found on board {source_id}/{board_id}"))
        })
    }

    async fn page_metadata(
        &self,
        session: &Session,
        url: &Url,
    ) -> Result<PageMetadata, SourceError> {
        let html = self.fetch_page(session, url.clone()).await?;
        Ok(parse_page_metadata(&html))
    }
}

/// Highest sequence among links of the form `/<source>/<board>/<n>`.
pub fn latest_post_sequence(
    html: &str,
    source_id: &str,
    board_id: &str,
) -> Result<Option<u64>, SourceError> {
    let pattern = format!(
        r"/{}/{}/(\d+)",
        regex::escape(source_id),
        regex::escape(board_id)
    );
    let re = Regex::new(&pattern).map_err(|e| SourceError::Parse(e.to_string()))?;

    Ok(re
        .captures_iter(html)
        .filter_map(|c| c.get(1)?.as_str().parse::<u64>().ok())
        .max())
}

fn meta_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<meta\s[^>]*>").expect("meta tag regex is valid"))
}

fn attribute_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)([a-z_:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .expect("attribute regex is valid")
    })
}

fn json_ld_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<script[^>]*type\s*=\s*["']application/ld\+json["'][^>]*>(.*?)</script>"#)
            .expect("json-ld regex is valid")
    })
}

/// Extracts OpenGraph metadata and the JSON-LD post body from a page.
pub fn parse_page_metadata(html: &str) -> PageMetadata {
    let mut metadata = PageMetadata::default();

    for tag in meta_tag_regex().find_iter(html) {
        let mut property = None;
        let mut content = None;
        for attr in attribute_regex().captures_iter(tag.as_str()) {
            let value = attr.get(2).or_else(|| attr.get(3)).map(|m| m.as_str());
            match attr.get(1).map(|m| m.as_str().to_ascii_lowercase()).as_deref() {
                Some("property") | Some("name") => property = value.map(str::to_ascii_lowercase),
                Some("content") => content = value.map(decode_entities),
                _ => {}
            }
        }

        let (Some(property), Some(content)) = (property, content) else {
            continue;
        };
        let slot = match property.as_str() {
            "og:type" => &mut metadata.kind,
            "og:title" => &mut metadata.title,
            "og:description" => &mut metadata.description,
            "og:image" => &mut metadata.image_url,
            _ => continue,
        };
        if slot.is_none() && !content.trim().is_empty() {
            *slot = Some(content);
        }
    }

    metadata.body = json_ld_regex()
        .captures_iter(html)
        .filter_map(|c| serde_json::from_str::<serde_json::Value>(c.get(1)?.as_str()).ok())
        .find_map(|value| post_body(&value));

    metadata
}

fn post_body(value: &serde_json::Value) -> Option<PostBody> {
    if let Some(items) = value.as_array() {
        return items.iter().find_map(post_body);
    }

    let text_field = |key: &str| {
        value
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    let body = PostBody {
        subject: text_field("headline"),
        text: text_field("articleBody").or_else(|| text_field("text")),
        image_url: value.get("image").and_then(image_url),
    };

    if body == PostBody::default() {
        None
    } else {
        Some(body)
    }
}

/// JSON-LD `image` may be a URL, an ImageObject, or a list of either.
fn image_url(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Array(items) => items.iter().find_map(image_url),
        serde_json::Value::Object(obj) => obj.get("url").and_then(image_url),
        _ => None,
    }
}

fn decode_entities(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

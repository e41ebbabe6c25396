//! Configuration file parser for `feedrelay.toml`.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Every section is optional too, and any subset of keys may be given.
//! Unknown keys are accepted but logged, since they are usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::feed::{BoardUrls, PollerSettings};
use crate::fetch::{BlacklistPolicy, LoginWallClassifier, RetryLimits};
use crate::preview::{PreviewStyle, TrackerSettings, DEFAULT_COMMAND_PREFIX};
use crate::proxy::{parse_proxy_list, FileProxyList, ProxyListSource, StaticProxyList};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// A value parsed but makes no sense (e.g. zero attempts).
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub poller: PollerConfig,
    pub fetch: FetchConfig,
    pub blacklist: BlacklistConfig,
    pub proxies: ProxyConfig,
    pub preview: PreviewConfig,
    pub board: BoardConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Minutes between feed update cycles.
    pub interval_minutes: u64,
    /// Minutes a login session is reused before logging in again.
    pub session_ttl_minutes: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 15,
            session_ttl_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub max_attempts: u32,
    /// Wall-clock budget for one logical fetch, in seconds.
    pub budget_secs: u64,
    pub attempt_timeout_secs: u64,
    pub user_agent: String,
    /// Redirect targets that mean "this proxy is blocked".
    pub login_wall_paths: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            budget_secs: 10,
            attempt_timeout_secs: 8,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0 Safari/537.36"
                .to_string(),
            login_wall_paths: vec!["/accounts/login/".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlacklistConfig {
    pub blocked_hours: u64,
    pub timeout_hours: u64,
    pub rate_limited_hours: u64,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            blocked_hours: 5,
            timeout_hours: 24,
            rate_limited_hours: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// File with one proxy per line; re-read on every refresh.
    pub list_path: Option<PathBuf>,
    /// Inline proxies, used when no `list_path` is set.
    pub addresses: Vec<String>,
    pub refresh_interval_minutes: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            list_path: None,
            addresses: Vec::new(),
            refresh_interval_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub retraction_window_secs: u64,
    pub links_per_message: usize,
    pub retract_emoji: String,
    /// Style used when neither the user nor the server picked one.
    pub style: PreviewStyle,
    /// Bot command prefix; messages that are preview commands are not
    /// auto-previewed a second time.
    pub command_prefix: String,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        let tracker = TrackerSettings::default();
        Self {
            retraction_window_secs: tracker.window.as_secs(),
            links_per_message: 8,
            retract_emoji: tracker.emoji,
            style: PreviewStyle::default(),
            command_prefix: DEFAULT_COMMAND_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// Site name shown in preview footers.
    pub name: String,
    pub board_url: String,
    pub post_url: String,
    pub canonical_url: String,
}

impl Default for BoardConfig {
    fn default() -> Self {
        let urls = BoardUrls::default();
        Self {
            name: "Daum Cafe".to_string(),
            board_url: urls.board,
            post_url: urls.post,
            canonical_url: urls.canonical,
        }
    }
}

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;

/// Upper bound for periods given in hours (one year).
const MAX_HOURS: u64 = 365 * 24;
/// Upper bound for periods given in minutes (one year).
const MAX_MINUTES: u64 = MAX_HOURS * 60;

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Known keys per section, for typo warnings.
    const KNOWN_KEYS: &'static [(&'static str, &'static [&'static str])] = &[
        ("poller", &["interval_minutes", "session_ttl_minutes"]),
        (
            "fetch",
            &[
                "max_attempts",
                "budget_secs",
                "attempt_timeout_secs",
                "user_agent",
                "login_wall_paths",
            ],
        ),
        (
            "blacklist",
            &["blocked_hours", "timeout_hours", "rate_limited_hours"],
        ),
        (
            "proxies",
            &["list_path", "addresses", "refresh_interval_minutes"],
        ),
        (
            "preview",
            &[
                "retraction_window_secs",
                "links_per_message",
                "retract_emoji",
                "style",
                "command_prefix",
            ],
        ),
        ("board", &["name", "board_url", "post_url", "canonical_url"]),
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    /// - Nonsensical values → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::parse(&content)?;
        tracing::info!(
            path = %path.display(),
            interval_minutes = config.poller.interval_minutes,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw);
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("fetch.max_attempts", u64::from(self.fetch.max_attempts)),
            ("fetch.budget_secs", self.fetch.budget_secs),
            ("fetch.attempt_timeout_secs", self.fetch.attempt_timeout_secs),
            ("poller.interval_minutes", self.poller.interval_minutes),
            (
                "proxies.refresh_interval_minutes",
                self.proxies.refresh_interval_minutes,
            ),
            ("preview.links_per_message", self.preview.links_per_message as u64),
        ];
        for (key, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{key} must be at least 1")));
            }
        }

        let bounded = [
            ("poller.interval_minutes", self.poller.interval_minutes, MAX_MINUTES),
            ("poller.session_ttl_minutes", self.poller.session_ttl_minutes, MAX_MINUTES),
            (
                "proxies.refresh_interval_minutes",
                self.proxies.refresh_interval_minutes,
                MAX_MINUTES,
            ),
            ("blacklist.blocked_hours", self.blacklist.blocked_hours, MAX_HOURS),
            ("blacklist.timeout_hours", self.blacklist.timeout_hours, MAX_HOURS),
            (
                "blacklist.rate_limited_hours",
                self.blacklist.rate_limited_hours,
                MAX_HOURS,
            ),
        ];
        for (key, value, max) in bounded {
            if value > max {
                return Err(ConfigError::Invalid(format!("{key} must be at most {max}")));
            }
        }

        if self.preview.command_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "preview.command_prefix must not be empty".into(),
            ));
        }

        if self.poller.session_ttl_minutes == 0 {
            tracing::warn!("poller.session_ttl_minutes is 0, every cycle will log in again");
        }
        Ok(())
    }

    pub fn retry_limits(&self) -> RetryLimits {
        RetryLimits {
            max_attempts: self.fetch.max_attempts,
            budget: Duration::from_secs(self.fetch.budget_secs),
            attempt_timeout: Duration::from_secs(self.fetch.attempt_timeout_secs),
        }
    }

    pub fn blacklist_policy(&self) -> BlacklistPolicy {
        BlacklistPolicy {
            blocked: Duration::from_secs(self.blacklist.blocked_hours * HOUR),
            hard_timeout: Duration::from_secs(self.blacklist.timeout_hours * HOUR),
            rate_limited: Duration::from_secs(self.blacklist.rate_limited_hours * HOUR),
        }
    }

    pub fn classifier(&self) -> LoginWallClassifier {
        LoginWallClassifier::new(self.fetch.login_wall_paths.clone())
    }

    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings {
            interval: Duration::from_secs(self.poller.interval_minutes * MINUTE),
            session_ttl: Duration::from_secs(self.poller.session_ttl_minutes * MINUTE),
        }
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            window: Duration::from_secs(self.preview.retraction_window_secs),
            emoji: self.preview.retract_emoji.clone(),
        }
    }

    pub fn board_urls(&self) -> BoardUrls {
        BoardUrls {
            board: self.board.board_url.clone(),
            post: self.board.post_url.clone(),
            canonical: self.board.canonical_url.clone(),
        }
    }

    pub fn proxy_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.proxies.refresh_interval_minutes * MINUTE)
    }

    /// The proxy list source: the list file if one is configured, otherwise
    /// the inline addresses.
    pub fn proxy_source(&self) -> Arc<dyn ProxyListSource> {
        match &self.proxies.list_path {
            Some(path) => Arc::new(FileProxyList::new(path.clone())),
            None => Arc::new(StaticProxyList::new(parse_proxy_list(
                &self.proxies.addresses.join("\n"),
            ))),
        }
    }
}

fn warn_unknown_keys(raw: &toml::Table) {
    for (section, value) in raw {
        let Some((_, known)) = Config::KNOWN_KEYS.iter().find(|(name, _)| name == section) else {
            tracing::warn!(key = %section, "Unknown section in config file, ignoring");
            continue;
        };
        let Some(table) = value.as_table() else {
            continue;
        };
        for key in table.keys() {
            if !known.contains(&key.as_str()) {
                tracing::warn!(section = %section, key = %key, "Unknown key in config file, ignoring");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_config(name: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("feedrelay_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("feedrelay.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.retry_limits(), RetryLimits::default());
        assert_eq!(config.blacklist_policy(), BlacklistPolicy::default());
        assert_eq!(config.poller_settings(), PollerSettings::default());
        assert_eq!(config.tracker_settings(), TrackerSettings::default());
        assert_eq!(config.board_urls(), BoardUrls::default());
        assert_eq!(config.preview.links_per_message, 8);
        assert_eq!(config.preview.style, PreviewStyle::Embed);
        assert_eq!(config.proxy_refresh_interval(), Duration::from_secs(3600));
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/feedrelay_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.fetch.max_attempts, 20);
    }

    #[test]
    fn test_empty_file_returns_default() {
        let (dir, path) = write_config("empty", "   \n  \n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.poller.interval_minutes, 15);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let config = Config::parse("[fetch]\nmax_attempts = 5\n").unwrap();
        assert_eq!(config.fetch.max_attempts, 5);
        assert_eq!(config.fetch.budget_secs, 10);
        assert_eq!(config.blacklist.blocked_hours, 5);
    }

    #[test]
    fn test_full_config() {
        let content = r#"
[poller]
interval_minutes = 5
session_ttl_minutes = 30

[fetch]
max_attempts = 3
budget_secs = 4
attempt_timeout_secs = 2
user_agent = "relay-test"
login_wall_paths = ["/login", "/accounts/login/"]

[blacklist]
blocked_hours = 1
timeout_hours = 2
rate_limited_hours = 3

[proxies]
addresses = ["10.0.0.1:3128", "http://10.0.0.2:8080"]
refresh_interval_minutes = 10

[preview]
retraction_window_secs = 45
links_per_message = 3
retract_emoji = "🗑️"
style = "text"

[board]
name = "Test Board"
board_url = "https://board.test/{source}/{board}"
post_url = "https://board.test/{source}/{board}/{sequence}"
canonical_url = "https://board.test/v/{source}/{board}/{sequence}"
"#;
        let (dir, path) = write_config("full", content);
        let config = Config::load(&path).unwrap();

        assert_eq!(
            config.retry_limits(),
            RetryLimits {
                max_attempts: 3,
                budget: Duration::from_secs(4),
                attempt_timeout: Duration::from_secs(2),
            }
        );
        assert_eq!(
            config.blacklist_policy(),
            BlacklistPolicy {
                blocked: Duration::from_secs(3600),
                hard_timeout: Duration::from_secs(7200),
                rate_limited: Duration::from_secs(10800),
            }
        );
        assert_eq!(
            config.poller_settings(),
            PollerSettings {
                interval: Duration::from_secs(300),
                session_ttl: Duration::from_secs(1800),
            }
        );
        assert_eq!(
            config.tracker_settings(),
            TrackerSettings {
                window: Duration::from_secs(45),
                emoji: "🗑️".to_string(),
            }
        );
        assert_eq!(config.preview.style, PreviewStyle::Text);
        assert_eq!(config.board.name, "Test Board");
        assert_eq!(config.fetch.user_agent, "relay-test");
        assert_eq!(config.proxies.addresses.len(), 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_inline_proxies_become_static_source() {
        let config =
            Config::parse("[proxies]\naddresses = [\"10.0.0.1:3128\", \"bogus line\"]\n").unwrap();
        let addresses = config.proxy_source().force_refresh().await.unwrap();
        assert_eq!(addresses.len(), 1);
        assert_eq!(addresses[0].as_str(), "http://10.0.0.1:3128/");
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let result = Config::parse("this is not [valid toml");
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let content = r#"
totally_fake_section = 1

[fetch]
max_attempts = 4
max_attempt = 9
"#;
        let config = Config::parse(content).unwrap();
        assert_eq!(config.fetch.max_attempts, 4);
    }

    #[test]
    fn test_wrong_type_returns_error() {
        assert!(matches!(
            Config::parse("[fetch]\nmax_attempts = \"many\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_unknown_style_rejected() {
        assert!(matches!(
            Config::parse("[preview]\nstyle = \"fancy\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = Config::parse("[fetch]\nmax_attempts = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn test_rejects_zero_budget() {
        let err = Config::parse("[fetch]\nbudget_secs = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("fetch.budget_secs"));
    }

    #[test]
    fn test_rejects_zero_refresh_interval() {
        let err = Config::parse("[proxies]\nrefresh_interval_minutes = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("refresh_interval_minutes"));
    }

    #[test]
    fn test_rejects_overlong_blacklist() {
        for key in ["blocked_hours", "timeout_hours", "rate_limited_hours"] {
            let content = format!("[blacklist]\n{key} = 9223372036854775807\n");
            let err = Config::parse(&content).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{key}");
            assert!(err.to_string().contains(key));
        }

        // A year is the longest accepted bench
        let config = Config::parse("[blacklist]\nblocked_hours = 8760\n").unwrap();
        assert_eq!(
            config.blacklist_policy().blocked,
            Duration::from_secs(8760 * 3600)
        );
    }

    #[test]
    fn test_rejects_overlong_intervals() {
        assert!(matches!(
            Config::parse("[poller]\ninterval_minutes = 9999999999999\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::parse("[poller]\nsession_ttl_minutes = 9999999999999\n"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_zero_links_rejected() {
        assert!(matches!(
            Config::parse("[preview]\nlinks_per_message = 0\n"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (dir, path) = write_config("too_large", &"a".repeat(1_048_577));

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }
}

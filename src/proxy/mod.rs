//! Outbound proxy management.
//!
//! The origins we scrape block single-IP clients aggressively, so every
//! fetch goes out through a rotating set of proxies:
//!
//! - [`source`] - Where the proxy list comes from (static list, text file)
//! - [`pool`] - Rotation and temporary per-proxy blacklisting

mod pool;
mod source;

pub use pool::{ProxyEndpoint, ProxyPool, ProxyStatus};
pub use source::{parse_proxy_list, FileProxyList, ProxyListSource, StaticProxyList};

use thiserror::Error;

/// Errors raised by the proxy pool and its list sources.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Every proxy is blacklisted (or the pool is empty)
    #[error("All proxies are blacklisted or the pool is empty")]
    ProxiesDepleted,
    /// The proxy list could not be loaded
    #[error("Proxy list unavailable: {0}")]
    Source(String),
}

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use super::policy::{BlacklistPolicy, FailureClassifier};
use super::transport::{FetchRequest, Transport, TransportError};
use crate::proxy::{ProxyError, ProxyPool};

/// Errors that can occur during a resilient fetch.
///
/// The two exhaustion variants are kept apart so callers can tell users
/// "every proxy is blocked, try later" instead of a generic failure.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The pool ran dry before the budget did
    #[error("All proxies are blacklisted")]
    ProxiesDepleted,
    /// The attempt or time budget ran out while proxies kept failing
    #[error("Gave up after {attempts} attempts in {elapsed:?}")]
    RetriesExhausted { attempts: u32, elapsed: Duration },
    /// Non-2xx response not attributable to the proxy
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Transport failure not attributable to the proxy
    #[error("Request failed: {0}")]
    Transport(#[from] TransportError),
}

impl FetchError {
    /// Message suitable for showing to the user who asked for the content.
    pub fn user_message(&self) -> &'static str {
        match self {
            FetchError::ProxiesDepleted => {
                "The site has blocked all of our IP addresses. Please try again later."
            }
            FetchError::RetriesExhausted { .. } => {
                "The site is not responding right now. Please try again later."
            }
            FetchError::HttpStatus(_) | FetchError::Transport(_) => "Failed to create preview.",
        }
    }
}

/// Bounds on a single logical fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryLimits {
    pub max_attempts: u32,
    /// Wall-clock budget; no new attempt starts once it is spent
    pub budget: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            budget: Duration::from_secs(10),
            attempt_timeout: Duration::from_secs(8),
        }
    }
}

/// Fetches through the proxy pool, rotating and blacklisting proxies whose
/// attempts fail in a way the classifier pins on the proxy.
///
/// Attempts are strictly sequential: one proxy, one attempt, then the next.
/// Cheap to clone; clones share the pool, transport and classifier.
#[derive(Clone)]
pub struct ResilientFetcher {
    pool: Arc<ProxyPool>,
    transport: Arc<dyn Transport>,
    classifier: Arc<dyn FailureClassifier>,
    policy: BlacklistPolicy,
    limits: RetryLimits,
}

impl ResilientFetcher {
    pub fn new(
        pool: Arc<ProxyPool>,
        transport: Arc<dyn Transport>,
        classifier: Arc<dyn FailureClassifier>,
        policy: BlacklistPolicy,
        limits: RetryLimits,
    ) -> Self {
        Self {
            pool,
            transport,
            classifier,
            policy,
            limits,
        }
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    /// Performs one logical fetch and returns the response body.
    ///
    /// # Behavior
    ///
    /// - Stops at `max_attempts` or once `budget` has elapsed, whichever comes
    ///   first; the budget is checked before each attempt starts
    /// - Each attempt is capped at `attempt_timeout`
    /// - Classified failures blacklist the proxy and move on to the next one
    /// - Unclassified failures and non-2xx statuses are returned immediately
    ///
    /// # Errors
    ///
    /// - [`FetchError::ProxiesDepleted`] - the pool has nothing selectable;
    ///   returned at once rather than waiting out the budget
    /// - [`FetchError::RetriesExhausted`] - every permitted attempt failed
    /// - [`FetchError::HttpStatus`] / [`FetchError::Transport`] - final failures
    pub async fn fetch_with_retry(&self, request: &FetchRequest) -> Result<String, FetchError> {
        let started = Instant::now();
        let mut attempts: u32 = 0;

        while attempts < self.limits.max_attempts && started.elapsed() < self.limits.budget {
            let proxy = match self.pool.get_proxy() {
                Ok(proxy) => proxy,
                Err(ProxyError::ProxiesDepleted) => {
                    tracing::warn!(
                        url = %request.url,
                        attempts = attempts,
                        "No proxies left to retry with"
                    );
                    return Err(FetchError::ProxiesDepleted);
                }
                Err(e) => return Err(FetchError::Transport(TransportError::Other(e.to_string()))),
            };
            attempts += 1;

            let outcome = match tokio::time::timeout(
                self.limits.attempt_timeout,
                self.transport.send(&proxy, request),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(TransportError::Timeout),
            };

            if let Some(class) = self.classifier.classify(&outcome) {
                let duration = self.policy.duration(class);
                self.pool.blacklist(&proxy, duration);
                tracing::warn!(
                    proxy = %proxy,
                    reason = %class,
                    attempt = attempts,
                    blacklist_secs = duration.as_secs(),
                    url = %request.url,
                    "Retrying request through another proxy"
                );
                continue;
            }

            return match outcome {
                Ok(response) if response.is_success() => Ok(response.body),
                Ok(response) => Err(FetchError::HttpStatus(response.status)),
                Err(e) => {
                    tracing::debug!(proxy = %proxy, error = %e, "Fetch failed without retry");
                    Err(FetchError::Transport(e))
                }
            };
        }

        let elapsed = started.elapsed();
        tracing::warn!(
            url = %request.url,
            attempts = attempts,
            elapsed_ms = elapsed.as_millis() as u64,
            "Retry budget exhausted"
        );
        Err(FetchError::RetriesExhausted { attempts, elapsed })
    }
}

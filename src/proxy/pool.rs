use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use url::Url;

use super::source::ProxyListSource;
use super::ProxyError;

/// A single outbound proxy.
///
/// Cloned out of the pool on selection; the pool remains the only owner of
/// blacklist state, so a stale clone can never resurrect an excluded proxy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyEndpoint {
    address: Url,
}

impl ProxyEndpoint {
    pub fn new(address: Url) -> Self {
        Self { address }
    }

    /// Full proxy URL, including credentials if the list carried any.
    pub fn address(&self) -> &Url {
        &self.address
    }
}

/// Displays the proxy without its password so it can be logged freely.
impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = self.address.host_str().unwrap_or("?");
        match self.address.port_or_known_default() {
            Some(port) => write!(f, "{}://{}:{}", self.address.scheme(), host, port),
            None => write!(f, "{}://{}", self.address.scheme(), host),
        }
    }
}

/// Point-in-time view of one pool entry, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyStatus {
    pub endpoint: ProxyEndpoint,
    /// Remaining blacklist time, `None` when the proxy is selectable
    pub blacklisted_for: Option<Duration>,
}

#[derive(Debug)]
struct Entry {
    endpoint: ProxyEndpoint,
    blacklisted_until: Option<Instant>,
}

impl Entry {
    fn is_available(&self, now: Instant) -> bool {
        self.blacklisted_until.map_or(true, |until| until <= now)
    }
}

#[derive(Debug, Default)]
struct PoolState {
    entries: Vec<Entry>,
    /// Index of the entry to consider first on the next selection
    next: usize,
}

/// Rotating pool of outbound proxies with per-proxy temporary blacklisting.
///
/// All operations take `&self` and are safe to call concurrently from
/// independent ingestion paths. The internal lock is never held across an
/// `.await`; refreshing fetches the new list first and swaps it in after.
///
/// Blacklist expiry is measured on tokio's monotonic clock, so a paused test
/// runtime controls it and wall-clock jumps cannot shorten or extend it.
pub struct ProxyPool {
    source: Arc<dyn ProxyListSource>,
    state: Mutex<PoolState>,
}

impl ProxyPool {
    /// Creates an empty pool. Call [`ProxyPool::refresh`] before selecting.
    pub fn new(source: Arc<dyn ProxyListSource>) -> Self {
        Self {
            source,
            state: Mutex::new(PoolState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Pool state stays consistent at every await-free step, so a
        // poisoned lock only means another thread panicked mid-log.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the endpoint set with a fresh list from the source.
    ///
    /// Endpoints present both before and after keep their blacklist expiry;
    /// endpoints that disappeared take their blacklist state with them.
    /// On source failure the previous set is kept and the error returned.
    ///
    /// # Returns
    ///
    /// The number of endpoints in the pool after the refresh.
    pub async fn refresh(&self) -> Result<usize, ProxyError> {
        let addresses = self.source.force_refresh().await?;

        let mut state = self.lock();
        let mut previous = std::mem::take(&mut state.entries);
        let mut entries = Vec::with_capacity(addresses.len());

        for address in addresses {
            let endpoint = ProxyEndpoint::new(address);
            if entries.iter().any(|e: &Entry| e.endpoint == endpoint) {
                continue;
            }
            let blacklisted_until = previous
                .iter()
                .position(|e| e.endpoint == endpoint)
                .and_then(|idx| previous.swap_remove(idx).blacklisted_until);
            entries.push(Entry {
                endpoint,
                blacklisted_until,
            });
        }

        let dropped = previous.len();
        state.entries = entries;
        state.next = 0;
        let total = state.entries.len();
        drop(state);

        tracing::info!(total = total, dropped = dropped, "Proxy pool refreshed");
        Ok(total)
    }

    /// Returns the next selectable proxy in rotation order.
    ///
    /// # Errors
    ///
    /// [`ProxyError::ProxiesDepleted`] if the pool is empty or every entry is
    /// currently blacklisted.
    pub fn get_proxy(&self) -> Result<ProxyEndpoint, ProxyError> {
        let now = Instant::now();
        let mut state = self.lock();
        let len = state.entries.len();

        for offset in 0..len {
            let idx = (state.next + offset) % len;
            let entry = &mut state.entries[idx];
            if entry.is_available(now) {
                // Expired blacklist entries are cleared lazily on selection
                entry.blacklisted_until = None;
                let endpoint = entry.endpoint.clone();
                state.next = (idx + 1) % len;
                return Ok(endpoint);
            }
        }

        Err(ProxyError::ProxiesDepleted)
    }

    /// Excludes `endpoint` from selection for `duration`.
    ///
    /// Idempotent; concurrent calls for the same endpoint resolve to whichever
    /// write lands last. Blacklisting an endpoint that a refresh already
    /// removed is a no-op.
    pub fn blacklist(&self, endpoint: &ProxyEndpoint, duration: Duration) {
        let until = Instant::now() + duration;
        let found = self
            .lock()
            .entries
            .iter_mut()
            .find(|e| &e.endpoint == endpoint)
            .map(|entry| entry.blacklisted_until = Some(until))
            .is_some();

        if found {
            tracing::debug!(
                proxy = %endpoint,
                duration_secs = duration.as_secs(),
                "Proxy blacklisted"
            );
        } else {
            tracing::debug!(proxy = %endpoint, "Blacklist ignored, proxy no longer in pool");
        }
    }

    /// Number of endpoints currently selectable.
    pub fn available(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .entries
            .iter()
            .filter(|e| e.is_available(now))
            .count()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lists every endpoint with its remaining blacklist time.
    pub fn snapshot(&self) -> Vec<ProxyStatus> {
        let now = Instant::now();
        self.lock()
            .entries
            .iter()
            .map(|e| ProxyStatus {
                endpoint: e.endpoint.clone(),
                blacklisted_for: e
                    .blacklisted_until
                    .filter(|until| *until > now)
                    .map(|until| until - now),
            })
            .collect()
    }

    /// Refreshes the pool every `interval` in a detached task.
    ///
    /// The first refresh happens one interval after spawning; callers are
    /// expected to have refreshed once at startup. A failed refresh is logged
    /// and the previous set stays in service.
    pub fn spawn_refresh_loop(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.refresh().await {
                    tracing::warn!(error = %e, "Proxy list refresh failed, keeping previous set");
                }
            }
        })
    }
}

impl fmt::Debug for ProxyPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ProxyPool")
            .field("entries", &state.entries.len())
            .field("next", &state.next)
            .finish()
    }
}

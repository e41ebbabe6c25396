//! Resilient fetching through the proxy pool.
//!
//! - [`transport`] - One request through one proxy (`reqwest` in production)
//! - [`policy`] - Which failures are the proxy's fault, and for how long a
//!   proxy is benched for each
//! - [`fetcher`] - The bounded retry loop tying the two to the pool
//!
//! # Example
//!
//! ```ignore
//! let fetcher = ResilientFetcher::new(pool, transport, classifier, policy, limits);
//! let body = fetcher.fetch_with_retry(&FetchRequest::get(url)).await?;
//! ```

mod fetcher;
mod policy;
mod transport;

pub use fetcher::{FetchError, ResilientFetcher, RetryLimits};
pub use policy::{BlacklistPolicy, FailureClass, FailureClassifier, LoginWallClassifier};
pub use transport::{AttemptResponse, FetchRequest, ReqwestTransport, Transport, TransportError};

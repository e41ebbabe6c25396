use std::fmt;
use std::time::Duration;

use super::transport::{AttemptResponse, TransportError};

/// Why a single attempt through a proxy is considered the proxy's fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// The origin recognised the proxy and bounced it (e.g. to a login wall)
    Blocked,
    /// The proxy did not answer within the per-attempt timeout
    HardTimeout,
    /// The origin answered 429 Too Many Requests
    RateLimited,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureClass::Blocked => "blocked",
            FailureClass::HardTimeout => "timeout",
            FailureClass::RateLimited => "rate-limited",
        })
    }
}

/// How long a proxy is excluded after each class of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlacklistPolicy {
    pub blocked: Duration,
    pub hard_timeout: Duration,
    pub rate_limited: Duration,
}

impl BlacklistPolicy {
    pub fn duration(&self, class: FailureClass) -> Duration {
        match class {
            FailureClass::Blocked => self.blocked,
            FailureClass::HardTimeout => self.hard_timeout,
            FailureClass::RateLimited => self.rate_limited,
        }
    }
}

impl Default for BlacklistPolicy {
    fn default() -> Self {
        const HOUR: u64 = 60 * 60;
        Self {
            blocked: Duration::from_secs(5 * HOUR),
            hard_timeout: Duration::from_secs(24 * HOUR),
            rate_limited: Duration::from_secs(2 * HOUR),
        }
    }
}

/// Decides whether an attempt failed because of the proxy it went through.
///
/// `None` means the outcome is final: success is returned to the caller and
/// any other failure is propagated without retrying. Block detection is a
/// heuristic that origins change without notice, which is why it lives
/// behind this trait rather than inside the retry loop.
pub trait FailureClassifier: Send + Sync {
    fn classify(&self, outcome: &Result<AttemptResponse, TransportError>) -> Option<FailureClass>;
}

/// Default classifier: a redirect that lands on a login page means the
/// proxy is blocked, timeouts are hard timeouts, and 429 is a rate limit.
#[derive(Debug, Clone)]
pub struct LoginWallClassifier {
    login_paths: Vec<String>,
}

impl LoginWallClassifier {
    pub fn new(login_paths: Vec<String>) -> Self {
        Self { login_paths }
    }

    fn is_login_wall(&self, response: &AttemptResponse) -> bool {
        let path = response.final_url.path();
        self.login_paths.iter().any(|p| p == path)
    }
}

impl Default for LoginWallClassifier {
    fn default() -> Self {
        Self::new(vec!["/accounts/login/".to_string()])
    }
}

impl FailureClassifier for LoginWallClassifier {
    fn classify(&self, outcome: &Result<AttemptResponse, TransportError>) -> Option<FailureClass> {
        match outcome {
            Ok(response) if self.is_login_wall(response) => Some(FailureClass::Blocked),
            Ok(response) if response.status == 429 => Some(FailureClass::RateLimited),
            Ok(_) => None,
            Err(TransportError::Timeout) => Some(FailureClass::HardTimeout),
            Err(_) => None,
        }
    }
}

use dashmap::DashMap;
use secrecy::SecretString;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::source::{AuthError, Authenticator, CredentialStore};

/// Cache slot: the shared anonymous session, or one per credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SessionKey {
    Anonymous,
    Credential(String),
}

impl From<Option<&str>> for SessionKey {
    fn from(credential_ref: Option<&str>) -> Self {
        match credential_ref {
            Some(credential_ref) => Self::Credential(credential_ref.to_string()),
            None => Self::Anonymous,
        }
    }
}

/// An authenticated (or anonymous) browsing session with a board site.
///
/// The token is the raw `Cookie` header value the site handed out at login.
#[derive(Clone)]
pub struct Session {
    credential_ref: Option<String>,
    issued_at: Instant,
    token: Option<Arc<SecretString>>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self {
            credential_ref: None,
            issued_at: Instant::now(),
            token: None,
        }
    }

    pub fn authenticated(token: SecretString) -> Self {
        Self {
            credential_ref: None,
            issued_at: Instant::now(),
            token: Some(Arc::new(token)),
        }
    }

    fn for_credential(mut self, credential_ref: &str) -> Self {
        self.credential_ref = Some(credential_ref.to_string());
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.token.is_none()
    }

    pub fn token(&self) -> Option<&SecretString> {
        self.token.as_deref()
    }

    pub fn credential_ref(&self) -> Option<&str> {
        self.credential_ref.as_deref()
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.issued_at.elapsed() >= ttl
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("credential_ref", &self.credential_ref)
            .field("issued_at", &self.issued_at)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Sessions keyed by credential reference, reused until they are `ttl` old.
///
/// A credential whose login is refused (country block, bad password) degrades
/// to an anonymous session for the rest of the TTL, so public boards keep
/// flowing and the login is not hammered every cycle.
pub struct SessionCache {
    sessions: DashMap<SessionKey, Session>,
    authenticator: Arc<dyn Authenticator>,
    credentials: Arc<dyn CredentialStore>,
    ttl: Duration,
}

impl SessionCache {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        credentials: Arc<dyn CredentialStore>,
        ttl: Duration,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            authenticator,
            credentials,
            ttl,
        }
    }

    /// Returns a live session for `credential_ref`, logging in if needed.
    pub async fn resolve(&self, credential_ref: Option<&str>) -> Result<Session, AuthError> {
        let key = SessionKey::from(credential_ref);
        if let Some(session) = self.cached(&key) {
            return Ok(session);
        }

        let session = match credential_ref {
            Some(credential_ref) => self.authenticate(credential_ref).await?,
            None => Session::anonymous(),
        };

        self.sessions.insert(key, session.clone());
        Ok(session)
    }

    /// Drops the cached session so the next `resolve` logs in again.
    pub fn invalidate(&self, credential_ref: Option<&str>) {
        self.sessions.remove(&SessionKey::from(credential_ref));
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn cached(&self, key: &SessionKey) -> Option<Session> {
        let entry = self.sessions.get(key)?;
        if entry.is_expired(self.ttl) {
            None
        } else {
            Some(entry.clone())
        }
    }

    async fn authenticate(&self, credential_ref: &str) -> Result<Session, AuthError> {
        let credential = self.credentials.credential(credential_ref).await?;

        match self.authenticator.create_session(&credential).await {
            Ok(session) => {
                tracing::debug!(credential_ref, "Created board session");
                Ok(session.for_credential(credential_ref))
            }
            Err(e @ (AuthError::CountryBlocked | AuthError::LoginFailed)) => {
                tracing::info!(
                    credential_ref,
                    error = %e,
                    "Login refused, falling back to anonymous session"
                );
                Ok(Session::anonymous().for_credential(credential_ref))
            }
            Err(e) => Err(e),
        }
    }
}

impl fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCache")
            .field("sessions", &self.sessions.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

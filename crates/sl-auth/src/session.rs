use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Tokens obtained from a successful authorization-code exchange.
///
/// Only ever held in process memory. `Debug` never prints token material.
#[derive(Clone)]
pub struct TokenSet {
    pub access_token: Zeroizing<String>,
    pub refresh_token: Option<Zeroizing<String>>,
    pub expires_in_seconds: Option<u64>,
    pub obtained_at: DateTime<Utc>,
    /// Provider payload as received, for fields this crate does not model
    pub raw: serde_json::Value,
}

impl TokenSet {
    pub fn new(
        access_token: String,
        refresh_token: Option<String>,
        expires_in_seconds: Option<u64>,
        raw: serde_json::Value,
    ) -> Self {
        Self {
            access_token: Zeroizing::new(access_token),
            refresh_token: refresh_token.map(Zeroizing::new),
            expires_in_seconds,
            obtained_at: Utc::now(),
            raw,
        }
    }

    /// When the access token stops being valid, if the provider said so
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_in_seconds
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| self.obtained_at + chrono::Duration::seconds(secs))
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at().is_some_and(|at| Utc::now() >= at)
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in_seconds", &self.expires_in_seconds)
            .field("obtained_at", &self.obtained_at)
            .finish_non_exhaustive()
    }
}

/// In-memory authentication state.
///
/// `tokens` is `Some` exactly when `authenticated` is true; the fields are
/// private so the pair can only change together.
#[derive(Debug, Clone, Default)]
pub struct AppSession {
    authenticated: bool,
    tokens: Option<TokenSet>,
}

impl AppSession {
    pub fn authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn tokens(&self) -> Option<&TokenSet> {
        self.tokens.as_ref()
    }
}

/// Shared handle to the process-wide [`AppSession`].
///
/// Cloning yields another handle to the same state. Nothing is persisted; a
/// new process always starts unauthenticated.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    session: Arc<RwLock<AppSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a successful exchange has happened since the last logout
    pub fn status(&self) -> bool {
        self.session.read().authenticated
    }

    /// Snapshot of the current session
    pub fn snapshot(&self) -> AppSession {
        self.session.read().clone()
    }

    /// Current tokens, if authenticated
    pub fn tokens(&self) -> Option<TokenSet> {
        self.session.read().tokens.clone()
    }

    /// Record a successful exchange. Only the orchestrator's success path calls this.
    pub(crate) fn mark_authenticated(&self, tokens: TokenSet) {
        let mut session = self.session.write();
        session.authenticated = true;
        session.tokens = Some(tokens);
        info!("Session authenticated");
    }

    /// Drop the tokens and return to the unauthenticated state. Idempotent.
    pub fn logout(&self) {
        let mut session = self.session.write();
        if !session.authenticated {
            debug!("Logout requested while already logged out");
            return;
        }
        session.authenticated = false;
        session.tokens = None;
        info!("Session logged out");
    }
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};
use url::Url;
use zeroize::Zeroizing;

use crate::client::OAuthClient;
use crate::config::AuthSettings;
use crate::errors::{AuthError, Result};
use crate::events::{AuthEvent, Subscribers, Subscription};
use crate::listener::{self, IncomingRequest, ListenerHandle};
use crate::models::CallbackParams;
use crate::opener::{SystemBrowser, UrlOpener};
use crate::session::SessionStore;
use crate::state::{generate_state_token, state_matches};

/// Returned once the listener is bound and the browser has been asked to
/// open the authorization URL. Completion is reported through subscriptions.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub authorization_url: Url,
    pub redirect_uri: Url,
    pub expires_at: DateTime<Utc>,
}

/// Redacted view of the attempt in progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInfo {
    pub attempt: u64,
    pub redirect_uri: Url,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// What [`AuthOrchestrator::handle_callback`] did with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    NoPendingAuthorization,
    NotCallbackPath,
    MissingCode,
    StateMismatch,
    Authenticated,
    ExchangeFailed,
}

struct PendingAuthorization {
    attempt: u64,
    state_token: Zeroizing<String>,
    redirect_uri: Url,
    callback_path: String,
    listener: ListenerHandle,
    client: OAuthClient,
    created_at: DateTime<Utc>,
    timeout: Duration,
}

impl PendingAuthorization {
    fn info(&self) -> PendingInfo {
        PendingInfo {
            attempt: self.attempt,
            redirect_uri: self.redirect_uri.clone(),
            created_at: self.created_at,
            expires_at: expires_at(self.created_at, self.timeout),
        }
    }
}

struct Inner {
    settings: AuthSettings,
    store: SessionStore,
    opener: Arc<dyn UrlOpener>,
    /// At most one attempt; replaced atomically, never merged
    pending: Mutex<Option<PendingAuthorization>>,
    /// Serializes `start_authorization` so the old listener is gone before the new bind
    start_gate: tokio::sync::Mutex<()>,
    events: Subscribers<AuthEvent>,
    next_attempt: AtomicU64,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.get_mut().take() {
            pending.listener.abort();
        }
    }
}

/// Drives the loopback authorization-code flow and writes the result into a
/// [`SessionStore`].
///
/// Cloning yields another handle to the same orchestrator.
#[derive(Clone)]
pub struct AuthOrchestrator {
    inner: Arc<Inner>,
}

impl AuthOrchestrator {
    /// Orchestrator that opens the authorization URL in the system browser
    pub fn new(settings: AuthSettings, store: SessionStore) -> Self {
        Self::with_opener(settings, store, Arc::new(SystemBrowser))
    }

    pub fn with_opener(settings: AuthSettings, store: SessionStore, opener: Arc<dyn UrlOpener>) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                store,
                opener,
                pending: Mutex::new(None),
                start_gate: tokio::sync::Mutex::new(()),
                events: Subscribers::new(),
                next_attempt: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.inner.store
    }

    /// Begin a new attempt, superseding any pending one.
    ///
    /// Returns as soon as the listener is bound; the outcome arrives as an
    /// [`AuthEvent`].
    #[instrument(skip(self))]
    pub async fn start_authorization(&self) -> Result<Accepted> {
        let config = self.inner.settings.resolve()?;
        let client = OAuthClient::new(config)?;
        let port = client.config().redirect_port;
        let timeout = client.config().timeout;

        let _gate = self.inner.start_gate.lock().await;

        if let Some(previous) = self.inner.take_pending() {
            info!(attempt = previous.attempt, "Superseding pending authorization");
            previous.listener.close().await;
        }

        let state_token = Zeroizing::new(generate_state_token()?);
        let tcp = listener::bind(port).await?;

        let weak = Arc::downgrade(&self.inner);
        let listener = listener::serve(tcp, move |request: IncomingRequest| {
            let weak: Weak<Inner> = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_callback(&request.path, &request.query).await;
                }
            }
        })?;

        let attempt = self.inner.next_attempt.fetch_add(1, Ordering::Relaxed) + 1;
        let redirect_uri = client.redirect_uri().clone();
        let authorization_url = client.build_authorize_url(&state_token);
        let created_at = Utc::now();

        self.spawn_timeout(attempt, timeout, &listener);

        let callback_path = client.config().callback_path.clone();
        *self.inner.pending.lock() = Some(PendingAuthorization {
            attempt,
            state_token,
            redirect_uri: redirect_uri.clone(),
            callback_path,
            listener,
            client,
            created_at,
            timeout,
        });

        if let Err(e) = self.inner.opener.open(&authorization_url) {
            warn!("Could not open the system browser: {}", e);
        }

        info!(attempt, port, "Authorization started");
        Ok(Accepted {
            authorization_url,
            redirect_uri,
            expires_at: expires_at(created_at, timeout),
        })
    }

    /// Process one request that reached the loopback listener
    pub async fn handle_callback(&self, path: &str, query: &str) -> CallbackOutcome {
        self.inner.handle_callback(path, query).await
    }

    /// Abandon the pending attempt, if any, without emitting an event
    pub async fn cancel(&self) -> bool {
        let _gate = self.inner.start_gate.lock().await;
        match self.inner.take_pending() {
            Some(pending) => {
                info!(attempt = pending.attempt, "Authorization cancelled");
                pending.listener.close().await;
                true
            }
            None => false,
        }
    }

    pub fn pending(&self) -> Option<PendingInfo> {
        self.inner.pending.lock().as_ref().map(PendingAuthorization::info)
    }

    pub fn status(&self) -> bool {
        self.inner.store.status()
    }

    pub fn logout(&self) {
        self.inner.store.logout();
    }

    /// Receive every [`AuthEvent`]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&AuthEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(callback)
    }

    /// Called once per successful exchange
    pub fn on_authenticated<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.events.subscribe(move |event| {
            if matches!(event, AuthEvent::Authenticated) {
                callback();
            }
        })
    }

    fn spawn_timeout(&self, attempt: u64, timeout: Duration, listener: &ListenerHandle) {
        let weak = Arc::downgrade(&self.inner);
        let closed = listener.cancellation();
        tokio::spawn(async move {
            tokio::select! {
                _ = closed.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if let Some(inner) = weak.upgrade() {
                        inner.expire(attempt).await;
                    }
                }
            }
        });
    }
}

impl Inner {
    fn take_pending(&self) -> Option<PendingAuthorization> {
        self.pending.lock().take()
    }

    async fn handle_callback(&self, path: &str, query: &str) -> CallbackOutcome {
        let claimed = {
            let mut slot = self.pending.lock();
            let Some(pending) = slot.as_ref() else {
                debug!(path, "Request with no pending authorization ignored");
                return CallbackOutcome::NoPendingAuthorization;
            };
            if path != pending.callback_path {
                debug!(path, "Ignoring non-callback request");
                return CallbackOutcome::NotCallbackPath;
            }

            let params = CallbackParams::from_query(query);
            let Some(code) = params.code else {
                if let Some(error) = &params.error {
                    warn!(
                        error = %error,
                        description = params.error_description.as_deref().unwrap_or_default(),
                        "Provider returned an error on the callback"
                    );
                } else {
                    debug!("Callback without code ignored");
                }
                return CallbackOutcome::MissingCode;
            };
            let presented = params.state.as_deref().unwrap_or_default();
            if !state_matches(&pending.state_token, presented) {
                warn!(attempt = pending.attempt, "{}", AuthError::StateMismatch);
                return CallbackOutcome::StateMismatch;
            }

            slot.take().map(|pending| (pending, Zeroizing::new(code)))
        };

        let Some((pending, code)) = claimed else {
            return CallbackOutcome::NoPendingAuthorization;
        };
        debug!(attempt = pending.attempt, "Callback accepted");
        self.exchange_code(pending, &code).await
    }

    #[instrument(skip(self, pending, code), fields(attempt = pending.attempt))]
    async fn exchange_code(&self, pending: PendingAuthorization, code: &str) -> CallbackOutcome {
        let PendingAuthorization {
            listener, client, ..
        } = pending;
        // The attempt is already out of the slot; free the port before the network call.
        listener.close().await;

        match client.exchange_code(code).await {
            Ok(tokens) => {
                self.store.mark_authenticated(tokens);
                info!("Authorization completed");
                self.events.notify(&AuthEvent::Authenticated);
                CallbackOutcome::Authenticated
            }
            Err(e) => {
                error!("Token exchange failed: {}", e);
                self.events.notify(&AuthEvent::Failed(AuthError::TokenExchange(e)));
                CallbackOutcome::ExchangeFailed
            }
        }
    }

    async fn expire(&self, attempt: u64) {
        let expired = {
            let mut slot = self.pending.lock();
            if slot.as_ref().is_some_and(|p| p.attempt == attempt) {
                slot.take()
            } else {
                None
            }
        };

        let Some(pending) = expired else {
            debug!(attempt, "Timeout fired for an attempt that already concluded");
            return;
        };
        let after = pending.timeout;
        pending.listener.close().await;
        warn!(attempt, "Authorization timed out");
        self.events
            .notify(&AuthEvent::Failed(AuthError::AuthenticationTimeout { after }));
    }
}

fn expires_at(created_at: DateTime<Utc>, timeout: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(timeout)
        .ok()
        .and_then(|timeout| created_at.checked_add_signed(timeout))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

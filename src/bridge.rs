use std::sync::Arc;

use serde::Serialize;
use sl_auth::{AuthError, AuthOrchestrator, AuthSettings, SessionStore, Subscription};
use sl_stream::{Stats, StreamConfig, StreamError, StreamEngine, StreamEvent, StreamingController};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, instrument};

/// Error handed to the UI layer: a stable code plus a human-readable message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{code}: {message}")]
pub struct BridgeError {
    pub code: &'static str,
    pub message: String,
}

impl From<AuthError> for BridgeError {
    fn from(err: AuthError) -> Self {
        Self {
            code: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<StreamError> for BridgeError {
    fn from(err: StreamError) -> Self {
        let message = match &err {
            StreamError::Engine { source } => format!("Streaming engine failure: {source:#}"),
            other => other.to_string(),
        };
        Self {
            code: err.kind(),
            message,
        }
    }
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// The surface the UI calls into.
///
/// Owns the process's single [`SessionStore`] together with the orchestrator
/// that mutates it and the streaming controller. Nothing here is fallible in an
/// unstructured way: every failure comes back as a [`BridgeError`].
pub struct Bridge {
    store: SessionStore,
    auth: AuthOrchestrator,
    streaming: StreamingController,
}

impl Bridge {
    pub fn new(settings: AuthSettings, engine: Arc<dyn StreamEngine>) -> Self {
        let store = SessionStore::new();
        let auth = AuthOrchestrator::new(settings, store.clone());
        Self::from_parts(auth, StreamingController::new(engine))
    }

    /// Assemble from pre-built components; the session store is the one the
    /// orchestrator was created with
    pub fn from_parts(auth: AuthOrchestrator, streaming: StreamingController) -> Self {
        Self {
            store: auth.store().clone(),
            auth,
            streaming,
        }
    }

    pub fn auth_status(&self) -> bool {
        self.store.status()
    }

    /// Kick off a browser sign-in. `true` means the listener is up and the
    /// browser was asked to open; the outcome arrives through
    /// [`Bridge::on_authenticated`].
    #[instrument(skip(self))]
    pub async fn start_authorization(&self) -> BridgeResult<bool> {
        let accepted = self.auth.start_authorization().await?;
        debug!(redirect_uri = %accepted.redirect_uri, "Authorization accepted");
        Ok(true)
    }

    /// Always succeeds, including when already logged out
    pub fn logout(&self) -> bool {
        self.store.logout();
        true
    }

    pub fn on_authenticated<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.auth.on_authenticated(callback)
    }

    pub async fn start_stream(&self, config: StreamConfig) -> BridgeResult<bool> {
        Ok(self.streaming.start_stream(config).await?)
    }

    pub async fn stop_stream(&self) -> bool {
        self.streaming.stop_stream().await
    }

    pub fn get_stats(&self) -> BridgeResult<Stats> {
        Ok(self.streaming.get_stats()?)
    }

    pub fn on_stream_event(&self) -> broadcast::Receiver<StreamEvent> {
        self.streaming.subscribe()
    }

    /// Abandon any sign-in in progress and stop an active stream
    pub async fn shutdown(&self) {
        self.auth.cancel().await;
        self.streaming.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_keeps_its_kind() {
        let err: BridgeError = AuthError::Configuration {
            missing: vec!["client_id"],
        }
        .into();
        assert_eq!(err.code, "ConfigurationError");
        assert!(err.message.contains("client_id"));
    }

    #[test]
    fn test_engine_error_message_carries_cause() {
        let err: BridgeError = StreamError::Engine {
            source: anyhow::anyhow!("encoder crashed").context("engine start"),
        }
        .into();
        assert_eq!(err.code, "EngineError");
        assert!(err.message.contains("encoder crashed"));
    }

    #[test]
    fn test_serializes_as_code_and_message() {
        let err: BridgeError = StreamError::NotActive.into();
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "NotActiveError");
        assert_eq!(json["message"], "No stream session is connected");
    }
}

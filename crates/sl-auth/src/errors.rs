use std::time::Duration;

use thiserror::Error;

/// Loopback authorization error types
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing required authorization settings: {}", missing.join(", "))]
    Configuration { missing: Vec<&'static str> },

    #[error("Invalid authorization setting '{field}': {reason}")]
    InvalidConfiguration { field: &'static str, reason: String },

    #[error("Failed to bind loopback listener on port {port}: {source}")]
    ListenerBind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("OAuth state mismatch - possible CSRF attack or stale browser tab")]
    StateMismatch,

    #[error("No valid authorization callback received within {}s", after.as_secs())]
    AuthenticationTimeout { after: Duration },

    #[error("Token exchange failed: {0}")]
    TokenExchange(#[from] TokenExchangeError),

    #[error("Failed to gather randomness for the state token: {0}")]
    Entropy(String),
}

/// Failures specific to the authorization-code exchange
#[derive(Error, Debug)]
pub enum TokenExchangeError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP error {status}: {body_snippet}")]
    Http {
        status: reqwest::StatusCode,
        body_snippet: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON serialization/deserialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl AuthError {
    /// Stable machine-readable name, used by callers that forward errors to a UI
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } | Self::InvalidConfiguration { .. } => "ConfigurationError",
            Self::ListenerBind { .. } => "ListenerBindError",
            Self::StateMismatch => "StateMismatchError",
            Self::AuthenticationTimeout { .. } => "AuthenticationTimeoutError",
            Self::TokenExchange(_) => "TokenExchangeError",
            Self::Entropy(_) => "InternalError",
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;

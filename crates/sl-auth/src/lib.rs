//! Loopback OAuth2 authorization-code flow for a desktop client
//!
//! This crate signs a desktop user in against a third-party identity provider
//! by sending the system browser to the provider and receiving the redirect on
//! a short-lived local HTTP listener.
//!
//! # Authentication Flow
//!
//! 1. Resolve the configuration (fails fast on missing settings)
//! 2. Tear down any pending attempt and bind the loopback listener
//! 3. Open the authorization URL with a fresh, unguessable state token
//! 4. Validate the callback's state and exchange the code for tokens
//! 5. Mark the [`SessionStore`] authenticated and notify subscribers
//!
//! Only the most recent attempt can succeed. A callback carrying the state of
//! a superseded attempt is ignored, and an attempt that sees no valid callback
//! within its timeout is closed and reported as
//! [`AuthError::AuthenticationTimeout`].
//!
//! # Example
//!
//! ```no_run
//! use sl_auth::{AuthEvent, AuthOrchestrator, AuthSettings, SessionStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = SessionStore::new();
//!     let orchestrator = AuthOrchestrator::new(AuthSettings::load()?, store.clone());
//!
//!     let _subscription = orchestrator.subscribe(|event| match event {
//!         AuthEvent::Authenticated => println!("Signed in"),
//!         AuthEvent::Failed(e) => eprintln!("Sign-in failed: {e}"),
//!     });
//!
//!     let accepted = orchestrator.start_authorization().await?;
//!     println!("If no browser opened, visit: {}", accepted.authorization_url);
//!     Ok(())
//! }
//! ```
//!
//! # Important Notes
//!
//! - Tokens live only in process memory; a restart always begins logged out
//! - Tokens, codes, secrets and state tokens are never logged

pub mod client;
pub mod config;
pub mod errors;
pub mod events;
pub mod listener;
pub mod models;
pub mod opener;
pub mod orchestrator;
pub mod session;
pub mod state;

// Re-export main types
pub use client::OAuthClient;
pub use config::{AuthConfig, AuthSettings, HttpTimeouts};
pub use errors::{AuthError, Result, TokenExchangeError};
pub use events::{AuthEvent, Subscribers, Subscription};
pub use opener::{SystemBrowser, UrlOpener};
pub use orchestrator::{Accepted, AuthOrchestrator, CallbackOutcome, PendingInfo};
pub use session::{AppSession, SessionStore, TokenSet};

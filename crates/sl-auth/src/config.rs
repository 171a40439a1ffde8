use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;
use zeroize::Zeroizing;

use crate::errors::{AuthError, Result};

/// Path the identity provider redirects the browser to
pub const DEFAULT_CALLBACK_PATH: &str = "/callback";

/// How long a pending authorization keeps its listener open
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(120);

/// Host written into the redirect URI; the listener itself binds 127.0.0.1
pub const REDIRECT_HOST: &str = "localhost";

/// Settings file name inside the platform config directory
pub const SETTINGS_FILE: &str = "auth.toml";

/// Prefix of the environment variables that override the settings file
pub const ENV_PREFIX: &str = "SLUMP_OAUTH_";

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            request: Duration::from_secs(30),
        }
    }
}

/// Raw authorization settings as read from disk or the environment.
///
/// Every field is optional so that loading never fails on a partially
/// configured install; [`AuthSettings::resolve`] is where missing values turn
/// into a [`AuthError::Configuration`].
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSettings {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub authorize_url: Option<String>,
    pub token_url: Option<String>,
    pub redirect_port: Option<u16>,
    pub scopes: Option<Vec<String>>,
    pub callback_path: Option<String>,
    pub timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("redirect_port", &self.redirect_port)
            .field("scopes", &self.scopes)
            .field("callback_path", &self.callback_path)
            .field("timeout_secs", &self.timeout_secs)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl AuthSettings {
    /// Load settings from the platform config directory, then apply
    /// `SLUMP_OAUTH_*` environment overrides.
    #[instrument(level = "debug")]
    pub fn load() -> Result<Self> {
        let mut settings = match Self::default_settings_path() {
            Some(path) => Self::from_file(&path)?,
            None => {
                debug!("No platform config directory, relying on environment only");
                Self::default()
            }
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Read a TOML settings file; a file that does not exist yields empty settings
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Settings file {} not found", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(AuthError::InvalidConfiguration {
                    field: SETTINGS_FILE,
                    reason: format!("failed to read {}: {}", path.display(), e),
                });
            }
        };

        toml::from_str(&content).map_err(|e| AuthError::InvalidConfiguration {
            field: SETTINGS_FILE,
            reason: format!("failed to parse {}: {}", path.display(), e),
        })
    }

    /// Platform location of `auth.toml`
    pub fn default_settings_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "slump", "slump").map(|dirs| dirs.config_dir().join(SETTINGS_FILE))
    }

    /// Overlay values from an environment lookup (e.g. `SLUMP_OAUTH_CLIENT_ID`)
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = var("CLIENT_ID") {
            self.client_id = Some(v);
        }
        if let Some(v) = var("CLIENT_SECRET") {
            self.client_secret = Some(v);
        }
        if let Some(v) = var("AUTHORIZE_URL") {
            self.authorize_url = Some(v);
        }
        if let Some(v) = var("TOKEN_URL") {
            self.token_url = Some(v);
        }
        if let Some(v) = var("REDIRECT_PORT") {
            let port = v.parse().map_err(|_| AuthError::InvalidConfiguration {
                field: "redirect_port",
                reason: format!("'{v}' is not a valid port"),
            })?;
            self.redirect_port = Some(port);
        }
        if let Some(v) = var("SCOPES") {
            self.scopes = Some(split_scopes(&v));
        }
        if let Some(v) = var("CALLBACK_PATH") {
            self.callback_path = Some(v);
        }
        if let Some(v) = var("TIMEOUT_SECS") {
            let secs = v.parse().map_err(|_| AuthError::InvalidConfiguration {
                field: "timeout_secs",
                reason: format!("'{v}' is not a number of seconds"),
            })?;
            self.timeout_secs = Some(secs);
        }
        Ok(())
    }

    /// Validate and resolve into an [`AuthConfig`].
    ///
    /// All missing required fields are reported together.
    pub fn resolve(&self) -> Result<AuthConfig> {
        let mut missing = Vec::new();

        let client_id = required(&self.client_id, "client_id", &mut missing);
        let client_secret = required(&self.client_secret, "client_secret", &mut missing);
        let authorize_url = required(&self.authorize_url, "authorize_url", &mut missing);
        let token_url = required(&self.token_url, "token_url", &mut missing);
        if self.redirect_port.is_none() {
            missing.push("redirect_port");
        }
        let scopes: Vec<String> = self
            .scopes
            .iter()
            .flatten()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if scopes.is_empty() {
            missing.push("scopes");
        }

        if !missing.is_empty() {
            return Err(AuthError::Configuration { missing });
        }

        // Checked above; the defaults below are never observed.
        let redirect_port = self.redirect_port.unwrap_or_default();
        if redirect_port == 0 {
            // An ephemeral port could never match the registered redirect URI.
            return Err(AuthError::InvalidConfiguration {
                field: "redirect_port",
                reason: "must be a fixed port, not 0".to_string(),
            });
        }
        let authorize_url = parse_url("authorize_url", authorize_url.unwrap_or_default())?;
        let token_url = parse_url("token_url", token_url.unwrap_or_default())?;

        let callback_path = self
            .callback_path
            .clone()
            .unwrap_or_else(|| DEFAULT_CALLBACK_PATH.to_string());
        if !callback_path.starts_with('/') {
            return Err(AuthError::InvalidConfiguration {
                field: "callback_path",
                reason: format!("'{callback_path}' must start with '/'"),
            });
        }

        let timeout = match self.timeout_secs {
            Some(0) => {
                return Err(AuthError::InvalidConfiguration {
                    field: "timeout_secs",
                    reason: "must be greater than zero".to_string(),
                });
            }
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_AUTH_TIMEOUT,
        };

        Ok(AuthConfig {
            client_id: client_id.unwrap_or_default(),
            client_secret: Zeroizing::new(client_secret.unwrap_or_default()),
            authorize_url,
            token_url,
            redirect_port,
            scopes,
            callback_path,
            timeout,
            http_timeouts: HttpTimeouts::default(),
            user_agent: self.user_agent.clone(),
        })
    }
}

/// Fully validated configuration for one authorization attempt
#[derive(Clone)]
pub struct AuthConfig {
    pub client_id: String,
    pub client_secret: Zeroizing<String>,
    pub authorize_url: Url,
    pub token_url: Url,
    pub redirect_port: u16,
    pub scopes: Vec<String>,
    pub callback_path: String,
    pub timeout: Duration,
    pub http_timeouts: HttpTimeouts,
    pub user_agent: Option<String>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("authorize_url", &self.authorize_url.as_str())
            .field("token_url", &self.token_url.as_str())
            .field("redirect_port", &self.redirect_port)
            .field("scopes", &self.scopes)
            .field("callback_path", &self.callback_path)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl AuthConfig {
    /// Redirect URI registered with the identity provider
    pub fn redirect_uri(&self) -> Result<Url> {
        let raw = format!(
            "http://{}:{}{}",
            REDIRECT_HOST, self.redirect_port, self.callback_path
        );
        Url::parse(&raw).map_err(|e| AuthError::InvalidConfiguration {
            field: "callback_path",
            reason: e.to_string(),
        })
    }

    /// Space-separated scope string as sent to the provider
    pub fn scope_param(&self) -> String {
        self.scopes.join(" ")
    }
}

fn required(value: &Option<String>, field: &'static str, missing: &mut Vec<&'static str>) -> Option<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Some(v.to_string()),
        _ => {
            missing.push(field);
            None
        }
    }
}

fn parse_url(field: &'static str, raw: String) -> Result<Url> {
    let url = Url::parse(&raw).map_err(|e| AuthError::InvalidConfiguration {
        field,
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(AuthError::InvalidConfiguration {
            field,
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}

fn split_scopes(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

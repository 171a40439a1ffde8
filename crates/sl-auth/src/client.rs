use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use crate::config::AuthConfig;
use crate::errors::{Result, TokenExchangeError};
use crate::models::TokenResponse;
use crate::session::TokenSet;

/// HTTP side of the authorization-code flow: URL construction and code exchange
#[derive(Debug, Clone)]
pub struct OAuthClient {
    config: AuthConfig,
    redirect_uri: Url,
    http: Client,
}

impl OAuthClient {
    /// Create a new client for a resolved configuration
    pub fn new(config: AuthConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.http_timeouts.connect)
            .timeout(config.http_timeouts.request)
            .user_agent(config.user_agent.as_deref().unwrap_or("slump"))
            .build()
            .map_err(TokenExchangeError::from)?;
        let redirect_uri = config.redirect_uri()?;

        Ok(Self {
            config,
            redirect_uri,
            http,
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    /// Build the authorization URL the user's browser is sent to
    #[instrument(skip(self, state))]
    pub fn build_authorize_url(&self, state: &str) -> Url {
        let mut url = self.config.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", self.redirect_uri.as_str())
            .append_pair("response_type", "code")
            .append_pair("scope", &self.config.scope_param())
            .append_pair("state", state);

        debug!(endpoint = %self.config.authorize_url, "Built authorize URL");
        url
    }

    /// Exchange an authorization code for tokens at the token endpoint
    #[instrument(skip(self, code))]
    pub async fn exchange_code(&self, code: &str) -> std::result::Result<TokenSet, TokenExchangeError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code", code),
        ];

        debug!("Exchanging authorization code for tokens");
        let response = self
            .http
            .post(self.config.token_url.clone())
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TokenExchangeError::Http {
                status,
                body_snippet: body.chars().take(200).collect(),
            });
        }

        let body = response.bytes().await?;
        let raw: serde_json::Value = serde_json::from_slice(&body)?;
        let token_response: TokenResponse = serde_json::from_value(raw.clone())?;

        if token_response.access_token.is_empty() {
            return Err(TokenExchangeError::InvalidResponse(
                "empty access_token".to_string(),
            ));
        }
        if let Some(token_type) = &token_response.token_type {
            debug!(token_type = %token_type, "Token endpoint responded");
        }

        Ok(TokenSet::new(
            token_response.access_token,
            token_response.refresh_token,
            token_response.expires_in,
            raw,
        ))
    }
}

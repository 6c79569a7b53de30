//! OAuth 2.0 authorization-code client.
//!
//! [`GoogleOAuthClient`] talks to the authorization server with plain
//! `reqwest` form posts. The endpoints come from configuration so tests can
//! point them at a mock server.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use mailbridge_types::config::BridgeConfig;
use mailbridge_types::error::OAuthError;

use crate::types::StoredTokens;

/// Provider-side OAuth operations.
#[async_trait]
pub trait OAuthClient: Send + Sync {
    /// Consent URL carrying `state`, requesting offline access and forcing
    /// the consent prompt so a refresh token is always issued.
    fn authorize_url(&self, state: &str) -> Result<String, OAuthError>;

    /// Exchange an authorization code for a credential.
    async fn exchange_code(&self, code: &str) -> Result<StoredTokens, OAuthError>;

    /// Obtain a fresh access token. The returned credential keeps the old
    /// refresh token when the server does not rotate it.
    async fn refresh(&self, tokens: &StoredTokens) -> Result<StoredTokens, OAuthError>;

    /// Email address of the account the credential belongs to.
    async fn fetch_email(&self, tokens: &StoredTokens) -> Result<String, OAuthError>;
}

/// Google implementation of [`OAuthClient`].
pub struct GoogleOAuthClient {
    http: Client,
    client_id: String,
    client_secret: String,
    auth_url: String,
    token_url: String,
    userinfo_url: String,
    redirect_uri: Option<String>,
    scopes: Vec<String>,
}

impl GoogleOAuthClient {
    /// Build from configuration with the given shared HTTP client.
    pub fn from_config(config: &BridgeConfig, http: Client) -> Self {
        Self {
            http,
            client_id: config.oauth.client_id.clone(),
            client_secret: config.oauth.client_secret.expose().to_string(),
            auth_url: config.oauth.auth_url.clone(),
            token_url: config.oauth.token_url.clone(),
            userinfo_url: config.oauth.userinfo_url.clone(),
            redirect_uri: config.redirect_url(),
            scopes: config.oauth.scopes.clone(),
        }
    }

    fn redirect_uri(&self) -> Result<&str, OAuthError> {
        self.redirect_uri
            .as_deref()
            .ok_or_else(|| OAuthError::NotConfigured("site_url is not set".into()))
    }

    async fn post_token_form(&self, form: &[(&str, &str)]) -> Result<Value, OAuthError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| OAuthError::Request(e.to_string()))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| OAuthError::InvalidResponse(format!("failed to parse token response: {e}")))?;

        if !status.is_success() {
            let message = body
                .get("error_description")
                .or_else(|| body.get("error"))
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(OAuthError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl OAuthClient for GoogleOAuthClient {
    fn authorize_url(&self, state: &str) -> Result<String, OAuthError> {
        if self.client_id.is_empty() {
            return Err(OAuthError::NotConfigured("client_id is empty".into()));
        }
        let mut url = url::Url::parse(&self.auth_url)
            .map_err(|e| OAuthError::NotConfigured(format!("invalid auth URL: {e}")))?;

        url.query_pairs_mut()
            .append_pair("access_type", "offline")
            .append_pair("client_id", self.client_id.as_str())
            .append_pair("prompt", "consent")
            .append_pair("redirect_uri", self.redirect_uri()?)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", state);

        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str) -> Result<StoredTokens, OAuthError> {
        let redirect_uri = self.redirect_uri()?;
        let body = self
            .post_token_form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .await?;

        let tokens = StoredTokens::from_token_response(&body, chrono::Utc::now().timestamp())?;
        debug!(
            has_refresh_token = tokens.refresh_token.is_some(),
            "authorization code exchanged"
        );
        Ok(tokens)
    }

    async fn refresh(&self, tokens: &StoredTokens) -> Result<StoredTokens, OAuthError> {
        let refresh_token = tokens
            .refresh_token
            .as_deref()
            .ok_or(OAuthError::MissingRefreshToken)?;

        let body = self
            .post_token_form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .await?;

        let mut fresh = StoredTokens::from_token_response(&body, chrono::Utc::now().timestamp())?;
        if fresh.refresh_token.is_none() {
            fresh.refresh_token = tokens.refresh_token.clone();
        }
        if fresh.scopes.is_empty() {
            fresh.scopes = tokens.scopes.clone();
        }
        debug!("access token refreshed");
        Ok(fresh)
    }

    async fn fetch_email(&self, tokens: &StoredTokens) -> Result<String, OAuthError> {
        let response = self
            .http
            .get(&self.userinfo_url)
            .header("Authorization", tokens.bearer())
            .send()
            .await
            .map_err(|e| OAuthError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(OAuthError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| OAuthError::InvalidResponse(e.to_string()))?;
        body.get("email")
            .and_then(Value::as_str)
            .filter(|e| !e.is_empty())
            .map(String::from)
            .ok_or_else(|| OAuthError::InvalidResponse("no email in userinfo response".into()))
    }
}

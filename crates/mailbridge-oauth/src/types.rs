//! Persisted OAuth credential.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use mailbridge_types::error::OAuthError;

/// Seconds before `expires_at` at which a token is already treated as expired.
const EXPIRY_SKEW_SECS: i64 = 60;

/// A mailbox credential as returned by the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTokens {
    pub access_token: String,

    /// Present after the first consent (`access_type=offline`); refresh
    /// responses usually omit it, so the previous one is carried over.
    #[serde(default)]
    pub refresh_token: Option<String>,

    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Expiration timestamp (Unix seconds).
    #[serde(default)]
    pub expires_at: Option<i64>,

    /// Scopes granted by the server.
    #[serde(default)]
    pub scopes: Vec<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl StoredTokens {
    /// Whether the access token is expired (or about to be) at `now`.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at
            .is_some_and(|expires_at| now >= expires_at - EXPIRY_SKEW_SECS)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp())
    }

    /// Build from a token-endpoint JSON body received at `now`.
    pub fn from_token_response(body: &Value, now: i64) -> Result<Self, OAuthError> {
        let access_token = body
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| OAuthError::InvalidResponse("no access_token in response".into()))?
            .to_string();

        Ok(Self {
            access_token,
            refresh_token: body
                .get("refresh_token")
                .and_then(Value::as_str)
                .map(String::from),
            token_type: body
                .get("token_type")
                .and_then(Value::as_str)
                .unwrap_or("Bearer")
                .to_string(),
            expires_at: body
                .get("expires_in")
                .and_then(Value::as_i64)
                .map(|secs| now + secs),
            scopes: body
                .get("scope")
                .and_then(Value::as_str)
                .map(|s| s.split_whitespace().map(String::from).collect())
                .unwrap_or_default(),
        })
    }

    /// `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

//! Configuration schema.
//!
//! All structs accept both `snake_case` and `camelCase` keys via
//! `#[serde(alias)]`; unknown fields are ignored. Every field has a default so
//! an empty file deserializes, and [`BridgeConfig::validate`] reports what an
//! operator still has to fill in.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::secret::SecretString;

// ── Root config ──────────────────────────────────────────────────────────

/// Root configuration for the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Public base URL of the chat server. Links and the OAuth redirect are
    /// derived from it; commands that need it fail politely when absent.
    #[serde(default, alias = "siteUrl")]
    pub site_url: Option<String>,

    /// Identifier used in the `/plugins/<id>` route prefix.
    #[serde(default = "default_plugin_id", alias = "pluginId")]
    pub plugin_id: String,

    /// Slash-command trigger word (without the leading `/`).
    #[serde(default = "default_command_trigger", alias = "commandTrigger")]
    pub command_trigger: String,

    /// Pub/Sub topic the provider publishes mailbox changes to.
    #[serde(default, alias = "topicName")]
    pub topic_name: String,

    /// Secret echoed back by interactive buttons.
    #[serde(default, alias = "encryptionKey")]
    pub encryption_key: SecretString,

    /// Verification token sent with slash-command requests. Empty disables
    /// the check.
    #[serde(default, alias = "commandToken")]
    pub command_token: SecretString,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub oauth: OAuthConfig,

    #[serde(default)]
    pub gmail: GmailConfig,

    #[serde(default)]
    pub chat: ChatConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            site_url: None,
            plugin_id: default_plugin_id(),
            command_trigger: default_command_trigger(),
            topic_name: String::new(),
            encryption_key: SecretString::default(),
            command_token: SecretString::default(),
            server: ServerConfig::default(),
            oauth: OAuthConfig::default(),
            gmail: GmailConfig::default(),
            chat: ChatConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// `<site_url>/plugins/<plugin_id>`, or `None` when no site URL is set.
    pub fn plugin_base_url(&self) -> Option<String> {
        let site = self.site_url.as_deref()?.trim().trim_end_matches('/');
        if site.is_empty() {
            return None;
        }
        Some(format!("{site}/plugins/{}", self.plugin_id))
    }

    /// OAuth redirect URI registered with the provider.
    pub fn redirect_url(&self) -> Option<String> {
        self.plugin_base_url()
            .map(|base| format!("{base}/oauth/complete"))
    }

    /// Route prefix the HTTP surface is mounted under.
    pub fn route_prefix(&self) -> String {
        format!("/plugins/{}", self.plugin_id)
    }

    /// Check the fields the bridge cannot run without.
    ///
    /// `site_url` is deliberately not required: its absence is reported to
    /// the user who runs a command that needs it.
    pub fn validate(&self) -> Result<(), BridgeError> {
        let mut missing = Vec::new();
        if self.oauth.client_id.trim().is_empty() {
            missing.push("oauth.client_id");
        }
        if self.oauth.client_secret.is_empty() {
            missing.push("oauth.client_secret");
        }
        if self.topic_name.trim().is_empty() {
            missing.push("topic_name");
        }
        if self.encryption_key.is_empty() {
            missing.push("encryption_key");
        }
        if self.chat.server_url.trim().is_empty() {
            missing.push("chat.server_url");
        }
        if self.chat.bot_token.is_empty() {
            missing.push("chat.bot_token");
        }
        if self.chat.bot_user_id.trim().is_empty() {
            missing.push("chat.bot_user_id");
        }
        if self.plugin_id.trim().is_empty() || self.plugin_id.contains('/') {
            missing.push("plugin_id");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::ConfigInvalid {
                reason: format!("missing or invalid: {}", missing.join(", ")),
            })
        }
    }
}

fn default_plugin_id() -> String {
    "gmail".into()
}
fn default_command_trigger() -> String {
    "gmail".into()
}

// ── HTTP server ──────────────────────────────────────────────────────────

/// Listener and outbound HTTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Header carrying the authenticated chat user id, set by the chat
    /// server's plugin proxy.
    #[serde(default = "default_auth_header", alias = "authHeader")]
    pub auth_header: String,

    /// Timeout applied to every outbound HTTP request.
    #[serde(default = "default_http_timeout_secs", alias = "httpTimeoutSecs")]
    pub http_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth_header: default_auth_header(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8787
}
fn default_auth_header() -> String {
    "Mattermost-User-Id".into()
}
fn default_http_timeout_secs() -> u64 {
    30
}

// ── OAuth ────────────────────────────────────────────────────────────────

/// Google OAuth 2.0 client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    #[serde(default, alias = "clientId")]
    pub client_id: String,

    #[serde(default, alias = "clientSecret")]
    pub client_secret: SecretString,

    #[serde(default = "default_auth_url", alias = "authUrl")]
    pub auth_url: String,

    #[serde(default = "default_token_url", alias = "tokenUrl")]
    pub token_url: String,

    /// Endpoint returning the authenticated account's email address.
    #[serde(default = "default_userinfo_url", alias = "userinfoUrl")]
    pub userinfo_url: String,

    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: SecretString::default(),
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            userinfo_url: default_userinfo_url(),
            scopes: default_scopes(),
        }
    }
}

fn default_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/auth".into()
}
fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".into()
}
fn default_userinfo_url() -> String {
    "https://www.googleapis.com/oauth2/v2/userinfo".into()
}
fn default_scopes() -> Vec<String> {
    vec![
        "https://www.googleapis.com/auth/userinfo.email".into(),
        "https://mail.google.com/".into(),
    ]
}

// ── Gmail ────────────────────────────────────────────────────────────────

/// Gmail REST API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmailConfig {
    /// Base URL up to and including `/gmail/v1`.
    #[serde(default = "default_gmail_api_base", alias = "apiBase")]
    pub api_base: String,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            api_base: default_gmail_api_base(),
        }
    }
}

fn default_gmail_api_base() -> String {
    "https://gmail.googleapis.com/gmail/v1".into()
}

// ── Chat ─────────────────────────────────────────────────────────────────

/// Chat server REST settings for the bot account.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatConfig {
    /// Chat server base URL (the REST API lives under `/api/v4`).
    #[serde(default, alias = "serverUrl")]
    pub server_url: String,

    /// Bot access token.
    #[serde(default, alias = "botToken")]
    pub bot_token: SecretString,

    /// User id of the bot account that authors notification posts.
    #[serde(default, alias = "botUserId")]
    pub bot_user_id: String,
}

// ── Store ────────────────────────────────────────────────────────────────

/// Key-value store settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// Directory for the file-backed store. Unset means in-memory.
    #[serde(default)]
    pub path: Option<String>,
}

impl StoreConfig {
    /// The store directory with a leading `~/` expanded.
    pub fn resolved_path(&self, home: Option<PathBuf>) -> Option<PathBuf> {
        let raw = self.path.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        if let Some(rest) = raw.strip_prefix("~/")
            && let Some(home) = home
        {
            return Some(home.join(rest));
        }
        Some(PathBuf::from(raw))
    }
}

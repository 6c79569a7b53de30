//! Turning a stored credential into an authenticated mailbox client.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use mailbridge_gmail::{GmailApiClient, MailboxApi};
use mailbridge_oauth::OAuthClient;
use mailbridge_types::BridgeError;

use crate::store::StateStore;

/// Source of per-user [`MailboxApi`] clients.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    /// Client for `user_id`'s mailbox; [`BridgeError::NotConnected`] without
    /// a stored credential.
    async fn connect(&self, user_id: &str) -> Result<Arc<dyn MailboxApi>, BridgeError>;
}

/// Builds [`GmailApiClient`]s, refreshing expired credentials first.
pub struct GmailConnector {
    store: StateStore,
    oauth: Arc<dyn OAuthClient>,
    http: reqwest::Client,
    api_base: String,
}

impl GmailConnector {
    pub fn new(
        store: StateStore,
        oauth: Arc<dyn OAuthClient>,
        http: reqwest::Client,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            store,
            oauth,
            http,
            api_base: api_base.into(),
        }
    }
}

#[async_trait]
impl MailboxConnector for GmailConnector {
    async fn connect(&self, user_id: &str) -> Result<Arc<dyn MailboxApi>, BridgeError> {
        let mut tokens = self
            .store
            .credential(user_id)
            .await?
            .ok_or(BridgeError::NotConnected)?;

        if tokens.is_expired() {
            debug!(user_id = %user_id, "access token expired, refreshing");
            tokens = self.oauth.refresh(&tokens).await.map_err(|e| {
                warn!(user_id = %user_id, error = %e, "token refresh failed");
                BridgeError::from(e)
            })?;
            self.store.set_credential(user_id, &tokens).await?;
        }

        Ok(Arc::new(GmailApiClient::with_base_url(
            self.http.clone(),
            tokens.access_token,
            self.api_base.clone(),
        )))
    }
}

//! Component wiring.
//!
//! [`AppContext`] owns one instance of every component and shares the
//! store, poster and connector between them. [`AppContext::production`]
//! builds the real Google and Mattermost clients from config; tests and
//! dry runs pass their own implementations to [`AppContext::new`].

use std::sync::Arc;
use std::time::Duration;

use mailbridge_channels::{MattermostClient, MessagePoster};
use mailbridge_oauth::{GoogleOAuthClient, OAuthClient};
use mailbridge_platform::kv::KvStore;
use mailbridge_types::BridgeError;
use mailbridge_types::config::BridgeConfig;

use crate::commands::CommandDispatcher;
use crate::connector::{GmailConnector, MailboxConnector};
use crate::handshake::Handshake;
use crate::import::Importer;
use crate::reconciler::Reconciler;
use crate::store::StateStore;
use crate::subscriptions::SubscriptionManager;

/// Shared HTTP client with the configured request timeout.
pub fn http_client(config: &BridgeConfig) -> Result<reqwest::Client, BridgeError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.server.http_timeout_secs))
        .build()
        .map_err(|e| BridgeError::ConfigInvalid {
            reason: format!("http client: {e}"),
        })
}

pub struct AppContext {
    pub config: Arc<BridgeConfig>,
    pub store: StateStore,
    pub poster: Arc<dyn MessagePoster>,
    pub handshake: Arc<Handshake>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub importer: Arc<Importer>,
    pub reconciler: Arc<Reconciler>,
    pub commands: Arc<CommandDispatcher>,
}

impl AppContext {
    pub fn new(
        config: BridgeConfig,
        kv: Arc<dyn KvStore>,
        poster: Arc<dyn MessagePoster>,
        oauth: Arc<dyn OAuthClient>,
        connector: Arc<dyn MailboxConnector>,
    ) -> Self {
        let config = Arc::new(config);
        let store = StateStore::new(kv);
        let trigger = config.command_trigger.clone();

        let subscriptions = Arc::new(SubscriptionManager::new(
            store.clone(),
            connector.clone(),
            config.topic_name.clone(),
        ));
        let handshake = Arc::new(Handshake::new(
            store.clone(),
            oauth,
            subscriptions.clone(),
            poster.clone(),
            trigger.clone(),
        ));
        let importer = Arc::new(Importer::new(poster.clone(), trigger));
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            connector.clone(),
            poster.clone(),
            importer.clone(),
        ));
        let commands = Arc::new(CommandDispatcher::new(
            config.clone(),
            handshake.clone(),
            subscriptions.clone(),
            importer.clone(),
            connector,
            poster.clone(),
        ));

        Self {
            config,
            store,
            poster,
            handshake,
            subscriptions,
            importer,
            reconciler,
            commands,
        }
    }

    /// Real Google and Mattermost clients. `poster` overrides the
    /// Mattermost client (used by dry runs).
    pub fn production(
        config: BridgeConfig,
        kv: Arc<dyn KvStore>,
        poster: Option<Arc<dyn MessagePoster>>,
    ) -> Result<Self, BridgeError> {
        let http = http_client(&config)?;
        let oauth: Arc<dyn OAuthClient> =
            Arc::new(GoogleOAuthClient::from_config(&config, http.clone()));
        let connector = Arc::new(GmailConnector::new(
            StateStore::new(kv.clone()),
            oauth.clone(),
            http.clone(),
            config.gmail.api_base.clone(),
        ));
        let poster: Arc<dyn MessagePoster> = match poster {
            Some(poster) => poster,
            None => Arc::new(MattermostClient::from_config(&config, http)),
        };
        Ok(Self::new(config, kv, poster, oauth, connector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandArgs;
    use crate::testing::{FakeConnector, FakeMailbox, FakeOAuth};
    use mailbridge_channels::MemoryPoster;
    use mailbridge_platform::kv::FileKvStore;

    #[test]
    fn http_client_builds_with_defaults() {
        assert!(http_client(&BridgeConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn production_wiring_uses_given_poster() {
        let dir = tempfile::tempdir().unwrap();
        let kv = Arc::new(FileKvStore::open(dir.path()).await.unwrap());
        let poster = Arc::new(MemoryPoster::new("bot"));

        let app = AppContext::production(BridgeConfig::default(), kv, Some(poster.clone())).unwrap();
        assert_eq!(app.poster.bot_user_id(), "bot");
        assert!(!app.handshake.is_connected("nobody").await.unwrap());
    }

    #[tokio::test]
    async fn handshake_then_subscriptions_share_state() {
        let connector = Arc::new(FakeConnector::new());
        let mailbox = Arc::new(FakeMailbox::new(7));
        connector.insert("u1", mailbox.clone()).await;
        let poster = Arc::new(MemoryPoster::new("bot"));
        let app = AppContext::new(
            BridgeConfig::default(),
            Arc::new(mailbridge_platform::kv::MemoryKvStore::new()),
            poster.clone(),
            Arc::new(FakeOAuth::new("u1@example.com")),
            connector,
        );

        let url = app.handshake.connect("u1").await.unwrap();
        let state = url.split("state=").nth(1).unwrap().to_string();
        app.handshake.complete("u1", &state, "code").await.unwrap();

        let args = CommandArgs {
            command: "/gmail subscriptions".into(),
            user_id: "u1".into(),
            channel_id: "town".into(),
        };
        let reply = app.commands.execute(&args).await.unwrap().unwrap();
        assert!(reply.message.starts_with("You are currently subscribed to the labels: INBOX"));
        assert_eq!(app.store.registry("u1@example.com").await.unwrap(), vec!["u1"]);
    }
}

//! OAuth connect / complete / disconnect.
//!
//! `connect` issues a single-use state token `<15 alphanumerics>_<user>` and
//! the consent URL carrying it. `complete` consumes the token, checks it was
//! issued to the caller, exchanges the code and onboards the mailbox:
//! credential, identity, registry membership and a default subscription to
//! every label. A failed onboarding is rolled back so the user is left
//! disconnected.

use std::sync::Arc;

use tracing::{error, info, warn};

use mailbridge_channels::{MessagePoster, Post};
use mailbridge_oauth::{OAuthClient, StoredTokens, state};
use mailbridge_types::{BridgeError, LabelSet};

use crate::store::StateStore;
use crate::subscriptions::SubscriptionManager;

/// Direct message sent when onboarding fails.
pub const ONBOARDING_FAILED_MESSAGE: &str =
    "Error occurred while connecting to Gmail. Please try again later.";

pub struct Handshake {
    store: StateStore,
    oauth: Arc<dyn OAuthClient>,
    subscriptions: Arc<SubscriptionManager>,
    poster: Arc<dyn MessagePoster>,
    command_trigger: String,
}

impl Handshake {
    pub fn new(
        store: StateStore,
        oauth: Arc<dyn OAuthClient>,
        subscriptions: Arc<SubscriptionManager>,
        poster: Arc<dyn MessagePoster>,
        command_trigger: impl Into<String>,
    ) -> Self {
        Self {
            store,
            oauth,
            subscriptions,
            poster,
            command_trigger: command_trigger.into(),
        }
    }

    /// Start a handshake for `user_id`; returns the consent URL.
    pub async fn connect(&self, user_id: &str) -> Result<String, BridgeError> {
        if user_id.trim().is_empty() || !state::is_valid_user(user_id) {
            return Err(BridgeError::Unauthorized);
        }
        let token = state::generate(user_id);
        let url = self.oauth.authorize_url(&token)?;
        self.store.put_state(&token).await?;
        info!(user_id = %user_id, "oauth handshake started");
        Ok(url)
    }

    /// Finish a handshake started by `connect`.
    pub async fn complete(&self, user_id: &str, state_param: &str, code: &str) -> Result<(), BridgeError> {
        if user_id.trim().is_empty() {
            return Err(BridgeError::Unauthorized);
        }

        let stored = self
            .store
            .take_state(state_param)
            .await?
            .ok_or(BridgeError::InvalidState)?;
        if stored.is_empty() || stored != state_param {
            warn!(user_id = %user_id, "oauth state does not match stored value");
            return Err(BridgeError::ForgeryDetected);
        }
        if state::embedded_user(state_param) != Some(user_id) {
            warn!(user_id = %user_id, "oauth state issued to another user");
            return Err(BridgeError::IdentityMismatch);
        }

        let tokens = self.oauth.exchange_code(code).await.map_err(|e| {
            error!(user_id = %user_id, error = %e, "authorization code exchange failed");
            BridgeError::ExchangeFailed(e.to_string())
        })?;

        if let Err(e) = self.onboard(user_id, &tokens).await {
            error!(user_id = %user_id, error = %e, "onboarding failed");
            self.send_direct(user_id, ONBOARDING_FAILED_MESSAGE).await;
            self.rollback(user_id).await;
            return Err(e);
        }

        info!(user_id = %user_id, "mailbox connected");
        self.send_direct(user_id, &self.welcome_message()).await;
        Ok(())
    }

    async fn onboard(&self, user_id: &str, tokens: &StoredTokens) -> Result<(), BridgeError> {
        self.store.set_credential(user_id, tokens).await?;

        let mut failures = Vec::new();

        match self.refresh_identity(user_id, tokens).await {
            Ok(address) => {
                if let Err(e) = self.store.add_to_registry(&address, user_id).await {
                    warn!(user_id = %user_id, mailbox = %address, error = %e, "registry update failed");
                    failures.push(format!("registry: {e}"));
                }
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "identity lookup failed");
                failures.push(format!("identity: {e}"));
            }
        }

        if let Err(e) = self.subscriptions.subscribe(user_id, &LabelSet::new()).await {
            warn!(user_id = %user_id, error = %e, "default subscription failed");
            failures.push(format!("subscription: {e}"));
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::OnboardingFailed(failures.join("; ")))
        }
    }

    /// Record the mailbox behind `tokens` as `user_id`'s identity.
    ///
    /// The provider is asked on every exchange: a reconnect with another
    /// account moves the user from the old address's registry entry.
    async fn refresh_identity(&self, user_id: &str, tokens: &StoredTokens) -> Result<String, BridgeError> {
        let address = self.oauth.fetch_email(tokens).await?;
        if let Some(previous) = self.store.mailbox_address(user_id).await?
            && previous != address
        {
            info!(user_id = %user_id, from = %previous, to = %address, "mailbox address changed");
            self.store.remove_from_registry(&previous, user_id).await?;
        }
        self.store.set_mailbox_address(user_id, &address).await?;
        Ok(address)
    }

    async fn rollback(&self, user_id: &str) {
        if let Err(e) = self.remove_user_state(user_id).await {
            warn!(user_id = %user_id, error = %e, "onboarding rollback incomplete");
        }
    }

    /// Unlink `user_id`'s mailbox. Disconnecting twice is fine.
    pub async fn disconnect(&self, user_id: &str) -> Result<(), BridgeError> {
        self.remove_user_state(user_id).await?;
        info!(user_id = %user_id, "mailbox disconnected");
        Ok(())
    }

    async fn remove_user_state(&self, user_id: &str) -> Result<(), BridgeError> {
        self.subscriptions.clear(user_id).await?;
        if let Some(address) = self.store.mailbox_address(user_id).await? {
            self.store.remove_from_registry(&address, user_id).await?;
        }
        self.store.delete_mailbox_address(user_id).await?;
        self.store.delete_credential(user_id).await?;
        Ok(())
    }

    pub async fn is_connected(&self, user_id: &str) -> Result<bool, BridgeError> {
        Ok(self.store.credential(user_id).await?.is_some())
    }

    fn welcome_message(&self) -> String {
        format!(
            "#### Welcome to Mailbridge for Gmail!\n\
             You've successfully connected your Mattermost account to your Gmail.\n\
             You are subscribed to every supported label; use `/{0} unsubscribe` to narrow that down.\n\
             Please type `/{0} help` to understand how to use this plugin.",
            self.command_trigger
        )
    }

    async fn send_direct(&self, user_id: &str, message: &str) {
        let result = async {
            let channel_id = self.poster.direct_channel(user_id).await?;
            let post = Post::new(self.poster.bot_user_id(), channel_id, message);
            self.poster.create_post(&post).await
        }
        .await;
        if let Err(e) = result {
            warn!(user_id = %user_id, error = %e, "failed to send direct message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeConnector, FakeMailbox, FakeOAuth};
    use async_trait::async_trait;
    use mailbridge_channels::MemoryPoster;
    use mailbridge_platform::kv::{KvStore, MemoryKvStore};
    use mailbridge_types::Label;
    use mailbridge_types::error::StoreError;

    struct Fixture {
        store: StateStore,
        mailbox: Arc<FakeMailbox>,
        oauth: Arc<FakeOAuth>,
        poster: Arc<MemoryPoster>,
        handshake: Handshake,
    }

    async fn fixture() -> Fixture {
        fixture_with(Arc::new(MemoryKvStore::new())).await
    }

    async fn fixture_with(kv: Arc<dyn KvStore>) -> Fixture {
        let store = StateStore::new(kv);
        let mailbox = Arc::new(FakeMailbox::new(500));
        let connector = Arc::new(FakeConnector::new());
        connector.insert("alice", mailbox.clone()).await;
        connector.insert("bob", mailbox.clone()).await;
        let oauth = Arc::new(FakeOAuth::new("alice@example.com"));
        let poster = Arc::new(MemoryPoster::new("bot"));
        let subscriptions = Arc::new(SubscriptionManager::new(store.clone(), connector, "topic"));
        let handshake = Handshake::new(
            store.clone(),
            oauth.clone(),
            subscriptions,
            poster.clone(),
            "gmail",
        );
        Fixture {
            store,
            mailbox,
            oauth,
            poster,
            handshake,
        }
    }

    fn state_from(url: &str) -> String {
        url.split("state=").nth(1).unwrap().to_string()
    }

    async fn dm_messages(poster: &MemoryPoster, user: &str) -> Vec<String> {
        poster
            .posts()
            .await
            .into_iter()
            .filter(|p| p.channel_id == MemoryPoster::dm_channel_name(user))
            .map(|p| p.message)
            .collect()
    }

    #[tokio::test]
    async fn connect_stores_state_under_itself() {
        let f = fixture().await;
        let token = state_from(&f.handshake.connect("alice").await.unwrap());
        assert!(token.ends_with("_alice"));
        assert_eq!(token.len(), 15 + 1 + "alice".len());
        assert_eq!(
            f.store.kv().get(&token).await.unwrap().as_deref(),
            Some(token.as_bytes())
        );
    }

    #[tokio::test]
    async fn connect_requires_a_user() {
        let f = fixture().await;
        assert!(matches!(
            f.handshake.connect("").await,
            Err(BridgeError::Unauthorized)
        ));
        assert!(matches!(
            f.handshake.connect("alice:mailbox").await,
            Err(BridgeError::Unauthorized)
        ));
        assert!(f.store.kv().get("alice:mailbox").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn complete_onboards_the_mailbox() {
        let f = fixture().await;
        let token = state_from(&f.handshake.connect("alice").await.unwrap());

        f.handshake.complete("alice", &token, "abc").await.unwrap();

        let credential = f.store.credential("alice").await.unwrap().unwrap();
        assert_eq!(credential.access_token, "at-abc");
        assert_eq!(
            f.store.mailbox_address("alice").await.unwrap().as_deref(),
            Some("alice@example.com")
        );
        assert_eq!(f.store.registry("alice@example.com").await.unwrap(), vec!["alice"]);
        assert_eq!(f.store.subscriptions("alice").await.unwrap(), Label::all());
        assert_eq!(f.store.cursor("alice").await.unwrap(), Some(500));
        assert!(f.handshake.is_connected("alice").await.unwrap());

        let dms = dm_messages(&f.poster, "alice").await;
        assert_eq!(dms.len(), 1);
        assert!(dms[0].starts_with("#### Welcome"));
    }

    #[tokio::test]
    async fn state_is_single_use() {
        let f = fixture().await;
        let token = state_from(&f.handshake.connect("alice").await.unwrap());
        f.handshake.complete("alice", &token, "abc").await.unwrap();

        let err = f.handshake.complete("alice", &token, "abc").await.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidState));
    }

    #[tokio::test]
    async fn unknown_state_is_invalid() {
        let f = fixture().await;
        let err = f.handshake.complete("alice", "nope_alice", "abc").await.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidState));
    }

    #[tokio::test]
    async fn tampered_state_is_forgery_and_consumed() {
        let f = fixture().await;
        f.store.kv().set("abcdefghijklmno_alice", b"").await.unwrap();

        let err = f
            .handshake
            .complete("alice", "abcdefghijklmno_alice", "abc")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ForgeryDetected));
        assert_eq!(f.store.kv().get("abcdefghijklmno_alice").await.unwrap(), None);
    }

    #[tokio::test]
    async fn state_naming_a_credential_key_leaves_it_intact() {
        let f = fixture().await;
        let token = state_from(&f.handshake.connect("alice").await.unwrap());
        f.handshake.complete("alice", &token, "abc").await.unwrap();

        let err = f
            .handshake
            .complete("mallory", "alice:mailbox_token", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidState));

        let err = f
            .handshake
            .complete("mallory", "alice@example.com:users", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidState));

        assert!(f.handshake.is_connected("alice").await.unwrap());
        assert_eq!(
            f.store.mailbox_address("alice").await.unwrap().as_deref(),
            Some("alice@example.com")
        );
        assert_eq!(f.store.registry("alice@example.com").await.unwrap(), vec!["alice"]);
    }

    /// Store that hands control back to the scheduler after every read, so
    /// concurrent callers interleave between a lookup and a write.
    struct YieldingKv(MemoryKvStore);

    #[async_trait]
    impl KvStore for YieldingKv {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            let value = self.0.get(key).await;
            tokio::task::yield_now().await;
            value
        }

        async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
            self.0.set(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.0.delete(key).await
        }

        async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            let value = self.0.take(key).await;
            tokio::task::yield_now().await;
            value
        }

        async fn compare_and_set(
            &self,
            key: &str,
            expected: Option<&[u8]>,
            new: &[u8],
        ) -> Result<bool, StoreError> {
            self.0.compare_and_set(key, expected, new).await
        }
    }

    #[tokio::test]
    async fn concurrent_callbacks_consume_the_state_once() {
        let f = fixture_with(Arc::new(YieldingKv(MemoryKvStore::new()))).await;
        let token = state_from(&f.handshake.connect("alice").await.unwrap());

        let (first, second) = tokio::join!(
            f.handshake.complete("alice", &token, "abc"),
            f.handshake.complete("alice", &token, "abc"),
        );

        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(BridgeError::InvalidState)))
                .count(),
            1
        );
        assert!(f.handshake.is_connected("alice").await.unwrap());
    }

    #[tokio::test]
    async fn reconnecting_with_another_account_moves_the_identity() {
        let f = fixture().await;
        let token = state_from(&f.handshake.connect("alice").await.unwrap());
        f.handshake.complete("alice", &token, "abc").await.unwrap();

        f.oauth.set_email("alice.work@example.com").await;
        let token = state_from(&f.handshake.connect("alice").await.unwrap());
        f.handshake.complete("alice", &token, "def").await.unwrap();

        assert_eq!(
            f.store.credential("alice").await.unwrap().unwrap().access_token,
            "at-def"
        );
        assert_eq!(
            f.store.mailbox_address("alice").await.unwrap().as_deref(),
            Some("alice.work@example.com")
        );
        assert!(f.store.registry("alice@example.com").await.unwrap().is_empty());
        assert_eq!(
            f.store.registry("alice.work@example.com").await.unwrap(),
            vec!["alice"]
        );
    }

    #[tokio::test]
    async fn reconnecting_with_the_same_account_keeps_one_registration() {
        let f = fixture().await;
        for code in ["abc", "def"] {
            let token = state_from(&f.handshake.connect("alice").await.unwrap());
            f.handshake.complete("alice", &token, code).await.unwrap();
        }
        assert_eq!(f.store.registry("alice@example.com").await.unwrap(), vec!["alice"]);
    }

    #[tokio::test]
    async fn state_of_another_user_is_rejected_and_burned() {
        let f = fixture().await;
        let token = state_from(&f.handshake.connect("alice").await.unwrap());

        let err = f.handshake.complete("bob", &token, "abc").await.unwrap_err();
        assert!(matches!(err, BridgeError::IdentityMismatch));
        assert!(!f.handshake.is_connected("bob").await.unwrap());

        let err = f.handshake.complete("alice", &token, "abc").await.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidState));
    }

    #[tokio::test]
    async fn failed_exchange_persists_nothing() {
        let f = fixture().await;
        let token = state_from(&f.handshake.connect("alice").await.unwrap());

        let err = f.handshake.complete("alice", &token, "bad").await.unwrap_err();
        assert!(matches!(err, BridgeError::ExchangeFailed(_)));
        assert_eq!(err.status_code(), 502);
        assert!(!f.handshake.is_connected("alice").await.unwrap());
        assert!(f.poster.posts().await.is_empty());
    }

    #[tokio::test]
    async fn failed_onboarding_rolls_back_and_tells_the_user() {
        let f = fixture().await;
        f.oauth.fail_identity().await;
        let token = state_from(&f.handshake.connect("alice").await.unwrap());

        let err = f.handshake.complete("alice", &token, "abc").await.unwrap_err();
        assert!(matches!(err, BridgeError::OnboardingFailed(_)));
        assert_eq!(err.status_code(), 500);

        assert!(!f.handshake.is_connected("alice").await.unwrap());
        assert!(f.store.subscriptions("alice").await.unwrap().is_empty());
        assert_eq!(dm_messages(&f.poster, "alice").await, vec![ONBOARDING_FAILED_MESSAGE.to_string()]);
    }

    #[tokio::test]
    async fn failed_watch_still_registers_identity_before_rollback() {
        let f = fixture().await;
        f.mailbox.fail_watch(true);
        let token = state_from(&f.handshake.connect("alice").await.unwrap());

        let err = f.handshake.complete("alice", &token, "abc").await.unwrap_err();
        assert!(matches!(err, BridgeError::OnboardingFailed(ref m) if m.contains("subscription")));
        assert!(f.store.registry("alice@example.com").await.unwrap().is_empty());
        assert_eq!(f.store.mailbox_address("alice").await.unwrap(), None);
    }

    #[tokio::test]
    async fn disconnect_removes_everything_and_is_idempotent() {
        let f = fixture().await;
        let token = state_from(&f.handshake.connect("alice").await.unwrap());
        f.handshake.complete("alice", &token, "abc").await.unwrap();

        f.handshake.disconnect("alice").await.unwrap();
        assert!(!f.handshake.is_connected("alice").await.unwrap());
        assert_eq!(f.store.mailbox_address("alice").await.unwrap(), None);
        assert!(f.store.registry("alice@example.com").await.unwrap().is_empty());
        assert!(f.store.subscriptions("alice").await.unwrap().is_empty());
        assert_eq!(f.store.cursor("alice").await.unwrap(), None);
        assert_eq!(f.mailbox.stop_count(), 1);

        f.handshake.disconnect("alice").await.unwrap();
    }
}

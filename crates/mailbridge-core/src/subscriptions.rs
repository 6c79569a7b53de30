//! Label subscriptions.
//!
//! A subscription is a provider watch scoped to a label set plus the local
//! copy of that set. The remote watch is always changed first and local
//! state only on success, so a failed call leaves the user as they were.
//! Every watch replaces the previous one.

use std::sync::Arc;

use tracing::{info, warn};

use mailbridge_types::label::parse_labels;
use mailbridge_types::{BridgeError, Label, LabelSet};

use crate::connector::MailboxConnector;
use crate::store::StateStore;

/// Result of an unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribed {
    /// Labels that were subscribed and are not any more.
    pub removed: LabelSet,
    /// Labels still subscribed.
    pub remaining: LabelSet,
}

pub struct SubscriptionManager {
    store: StateStore,
    connector: Arc<dyn MailboxConnector>,
    topic_name: String,
}

impl SubscriptionManager {
    pub fn new(
        store: StateStore,
        connector: Arc<dyn MailboxConnector>,
        topic_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            connector,
            topic_name: topic_name.into(),
        }
    }

    /// Subscribe to exactly `requested` (every label when empty).
    pub async fn subscribe(&self, user_id: &str, requested: &LabelSet) -> Result<LabelSet, BridgeError> {
        let labels = if requested.is_empty() {
            Label::all()
        } else {
            requested.clone()
        };

        let api = self.connector.connect(user_id).await?;
        let watch = api.watch(&labels, &self.topic_name).await?;

        self.store.advance_cursor(user_id, watch.history_id).await?;
        self.store.set_subscriptions(user_id, &labels).await?;

        info!(
            user_id = %user_id,
            labels = ?labels,
            history_id = watch.history_id,
            "subscribed"
        );
        Ok(labels)
    }

    /// [`subscribe`](Self::subscribe) with a user-typed label list.
    ///
    /// An unsupported label rejects the whole request before anything changes.
    pub async fn subscribe_text(&self, user_id: &str, requested: &str) -> Result<LabelSet, BridgeError> {
        let labels = parse_labels(requested)?;
        self.subscribe(user_id, &labels).await
    }

    /// Drop `requested` (every subscribed label when empty).
    pub async fn unsubscribe(&self, user_id: &str, requested: &LabelSet) -> Result<Unsubscribed, BridgeError> {
        let current = self.store.subscriptions(user_id).await?;
        let requested = if requested.is_empty() {
            &current
        } else {
            requested
        };

        let removed: LabelSet = current.intersection(requested).copied().collect();
        if removed.is_empty() {
            return Err(BridgeError::NothingToUnsubscribe);
        }
        let remaining: LabelSet = current.difference(requested).copied().collect();

        let api = self.connector.connect(user_id).await?;
        if remaining.is_empty() {
            api.stop().await?;
            self.store.delete_subscriptions(user_id).await?;
        } else {
            let watch = api.watch(&remaining, &self.topic_name).await?;
            self.store.advance_cursor(user_id, watch.history_id).await?;
            self.store.set_subscriptions(user_id, &remaining).await?;
        }

        info!(
            user_id = %user_id,
            removed = ?removed,
            remaining = ?remaining,
            "unsubscribed"
        );
        Ok(Unsubscribed { removed, remaining })
    }

    /// [`unsubscribe`](Self::unsubscribe) with a user-typed label list.
    pub async fn unsubscribe_text(&self, user_id: &str, requested: &str) -> Result<Unsubscribed, BridgeError> {
        let labels = parse_labels(requested)?;
        self.unsubscribe(user_id, &labels).await
    }

    /// Current subscriptions; empty when there are none.
    pub async fn list(&self, user_id: &str) -> Result<LabelSet, BridgeError> {
        Ok(self.store.subscriptions(user_id).await?)
    }

    /// Stop the watch and forget subscriptions and cursor. Used on
    /// disconnect and onboarding rollback; a failed stop is only logged.
    pub async fn clear(&self, user_id: &str) -> Result<(), BridgeError> {
        match self.connector.connect(user_id).await {
            Ok(api) => {
                if let Err(e) = api.stop().await {
                    warn!(user_id = %user_id, error = %e, "failed to stop watch");
                }
            }
            Err(BridgeError::NotConnected) => {}
            Err(e) => warn!(user_id = %user_id, error = %e, "no mailbox client to stop watch"),
        }
        self.store.delete_subscriptions(user_id).await?;
        self.store.delete_cursor(user_id).await?;
        Ok(())
    }
}

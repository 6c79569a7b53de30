//! Push-notification handling.
//!
//! A notification names a mailbox and its newest history id. Every chat user
//! linked to that mailbox is reconciled on its own: list history since the
//! user's cursor, fetch what the newest record added, keep messages carrying
//! a subscribed label, post them to the user's bot DM, then move the cursor.
//!
//! Users run concurrently and fail independently. A user whose delivery did
//! not complete keeps their cursor, so the next notification retries them.
//!
//! Only the newest history record's added messages are delivered. Records
//! between the cursor and that one are not replayed, so mail can be missed
//! when several changes land between two pushes.

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use mailbridge_channels::MessagePoster;
use mailbridge_types::BridgeError;
use mailbridge_types::notification::MailNotification;

use crate::connector::MailboxConnector;
use crate::import::{Importer, Origin};
use crate::store::StateStore;

/// Why a user got nothing from a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No cursor stored; the user never completed a subscribe.
    NoCursor,
    NoSubscriptions,
    /// The provider reported no history since the cursor.
    NoHistory,
    /// The newest history record added no messages.
    NoNewMessages,
    /// None of the added messages carry a subscribed label.
    Filtered,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoCursor => "no cursor",
            Self::NoSubscriptions => "no subscriptions",
            Self::NoHistory => "no history",
            Self::NoNewMessages => "no new messages",
            Self::Filtered => "no subscribed labels",
        })
    }
}

/// What happened for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserOutcome {
    Delivered { messages: usize },
    Skipped(SkipReason),
    Failed(String),
}

/// Per-user results for one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub mailbox: String,
    pub history_id: u64,
    pub users: Vec<(String, UserOutcome)>,
}

impl ReconcileReport {
    fn count(&self, pred: impl Fn(&UserOutcome) -> bool) -> usize {
        self.users.iter().filter(|(_, o)| pred(o)).count()
    }

    pub fn delivered(&self) -> usize {
        self.count(|o| matches!(o, UserOutcome::Delivered { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, UserOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, UserOutcome::Failed(_)))
    }

    /// Outcome for `user_id`, if the user was linked to the mailbox.
    pub fn outcome(&self, user_id: &str) -> Option<&UserOutcome> {
        self.users
            .iter()
            .find(|(u, _)| u == user_id)
            .map(|(_, o)| o)
    }
}

pub struct Reconciler {
    store: StateStore,
    connector: Arc<dyn MailboxConnector>,
    poster: Arc<dyn MessagePoster>,
    importer: Arc<Importer>,
}

impl Reconciler {
    pub fn new(
        store: StateStore,
        connector: Arc<dyn MailboxConnector>,
        poster: Arc<dyn MessagePoster>,
        importer: Arc<Importer>,
    ) -> Self {
        Self {
            store,
            connector,
            poster,
            importer,
        }
    }

    /// Parse a push body and reconcile it. Only a malformed body is an error.
    pub async fn handle_push(&self, body: &[u8]) -> Result<ReconcileReport, BridgeError> {
        let notification = MailNotification::from_push_body(body)?;
        Ok(self.reconcile(&notification).await)
    }

    /// Reconcile every user linked to the notified mailbox.
    pub async fn reconcile(&self, notification: &MailNotification) -> ReconcileReport {
        let mailbox = notification.email_address.as_str();
        let users = match self.store.registry(mailbox).await {
            Ok(users) => users,
            Err(e) => {
                warn!(mailbox = %mailbox, error = %e, "failed to read user registry");
                Vec::new()
            }
        };

        if users.is_empty() {
            info!(mailbox = %mailbox, "notification for mailbox with no linked users");
        }

        let outcomes = join_all(users.iter().map(|user_id| async move {
            let outcome = match self.reconcile_user(user_id, notification).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(
                        user_id = %user_id,
                        mailbox = %mailbox,
                        retryable = e.is_retryable(),
                        error = %e,
                        "notification delivery failed"
                    );
                    UserOutcome::Failed(e.to_string())
                }
            };
            (user_id.clone(), outcome)
        }))
        .await;

        let report = ReconcileReport {
            mailbox: mailbox.to_string(),
            history_id: notification.history_id,
            users: outcomes,
        };
        info!(
            mailbox = %mailbox,
            history_id = notification.history_id,
            delivered = report.delivered(),
            skipped = report.skipped(),
            failed = report.failed(),
            "notification processed"
        );
        report
    }

    async fn reconcile_user(
        &self,
        user_id: &str,
        notification: &MailNotification,
    ) -> Result<UserOutcome, BridgeError> {
        let Some(cursor) = self.store.cursor(user_id).await? else {
            return Ok(UserOutcome::Skipped(SkipReason::NoCursor));
        };
        let subscriptions = self.store.subscriptions(user_id).await?;
        if subscriptions.is_empty() {
            return Ok(UserOutcome::Skipped(SkipReason::NoSubscriptions));
        }

        let api = self.connector.connect(user_id).await?;
        let history = api.list_history(cursor).await?;
        let Some(latest) = history.last() else {
            return Ok(UserOutcome::Skipped(SkipReason::NoHistory));
        };

        let added = latest.added_message_ids();
        if added.is_empty() {
            return Ok(UserOutcome::Skipped(SkipReason::NoNewMessages));
        }

        let mut messages = Vec::with_capacity(added.len());
        for id in &added {
            let message = api.get_raw_message(id).await?;
            if message.has_any_label(&subscriptions) {
                messages.push(message);
            } else {
                debug!(user_id = %user_id, message_id = %id, "message filtered out");
            }
        }
        if messages.is_empty() {
            return Ok(UserOutcome::Skipped(SkipReason::Filtered));
        }

        let channel_id = self.poster.direct_channel(user_id).await?;
        self.importer
            .post_thread(
                &messages,
                &channel_id,
                self.poster.bot_user_id(),
                Origin::Notification,
            )
            .await?;

        self.store
            .advance_cursor(user_id, notification.history_id)
            .await?;
        Ok(UserOutcome::Delivered {
            messages: messages.len(),
        })
    }
}

//! In-memory fakes for the provider seams.
//!
//! [`FakeMailbox`] stands in for one Gmail mailbox, [`FakeConnector`] hands
//! those out per user and [`FakeOAuth`] plays the authorization server.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use base64::Engine;
use tokio::sync::Mutex;

use mailbridge_gmail::types::HistoryMessage;
use mailbridge_gmail::{HistoryRecord, MailboxApi, MessageRef, RawMessage, WatchResponse};
use mailbridge_oauth::{OAuthClient, StoredTokens};
use mailbridge_types::error::{OAuthError, ProviderError};
use mailbridge_types::{BridgeError, LabelSet};

use crate::connector::MailboxConnector;

/// Build a minimal RFC 822 message.
pub fn rfc822(from: &str, subject: &str, message_id: &str, body: &str) -> String {
    format!(
        "From: {from}\r\nSubject: {subject}\r\nDate: Tue, 3 Mar 2020 10:15:00 +0000\r\n\
         Message-ID: <{message_id}>\r\nContent-Type: text/plain\r\n\r\n{body}\r\n"
    )
}

struct StoredMessage {
    raw: RawMessage,
    rfc_id: String,
}

/// One mailbox held in memory.
pub struct FakeMailbox {
    history_id: AtomicU64,
    messages: Mutex<Vec<StoredMessage>>,
    history: Mutex<Vec<HistoryRecord>>,
    watches: Mutex<Vec<LabelSet>>,
    history_requests: Mutex<Vec<u64>>,
    stops: AtomicUsize,
    fail_watch: AtomicBool,
    fail_stop: AtomicBool,
    fail_history: AtomicBool,
    fail_fetch: AtomicBool,
}

impl FakeMailbox {
    /// Mailbox whose next watch reports `history_id`.
    pub fn new(history_id: u64) -> Self {
        Self {
            history_id: AtomicU64::new(history_id),
            messages: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            watches: Mutex::new(Vec::new()),
            history_requests: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            fail_watch: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            fail_history: AtomicBool::new(false),
            fail_fetch: AtomicBool::new(false),
        }
    }

    /// Store a message. Its Message-ID header is what `find_by_rfc_id` matches.
    pub async fn add_message(&self, id: &str, thread_id: &str, labels: &[&str], rfc822: &str) {
        let rfc_id = rfc822
            .lines()
            .find_map(|l| l.strip_prefix("Message-ID:"))
            .map(|v| v.trim().trim_start_matches('<').trim_end_matches('>').to_string())
            .unwrap_or_default();
        let raw = RawMessage {
            id: id.to_string(),
            thread_id: thread_id.to_string(),
            label_ids: labels.iter().map(|l| l.to_string()).collect(),
            raw: base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(rfc822),
        };
        self.messages.lock().await.push(StoredMessage { raw, rfc_id });
    }

    /// Append a history record adding `message_ids`.
    pub async fn push_history(&self, record_id: u64, message_ids: &[&str]) {
        let messages_added = message_ids
            .iter()
            .map(|id| HistoryMessage {
                message: MessageRef {
                    id: id.to_string(),
                    thread_id: String::new(),
                    label_ids: Vec::new(),
                },
            })
            .collect();
        self.history.lock().await.push(HistoryRecord {
            id: record_id.to_string(),
            messages_added,
        });
    }

    pub fn set_history_id(&self, id: u64) {
        self.history_id.store(id, Ordering::SeqCst);
    }

    pub fn fail_watch(&self, fail: bool) {
        self.fail_watch.store(fail, Ordering::SeqCst);
    }

    pub fn fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    pub fn fail_history(&self, fail: bool) {
        self.fail_history.store(fail, Ordering::SeqCst);
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    /// Label sets of every successful watch, in order.
    pub async fn watches(&self) -> Vec<LabelSet> {
        self.watches.lock().await.clone()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// `startHistoryId` of every history listing.
    pub async fn history_requests(&self) -> Vec<u64> {
        self.history_requests.lock().await.clone()
    }

    fn unavailable() -> ProviderError {
        ProviderError::Api {
            status: 503,
            message: "backend unavailable".into(),
        }
    }
}

#[async_trait]
impl MailboxApi for FakeMailbox {
    async fn watch(&self, labels: &LabelSet, _topic: &str) -> Result<WatchResponse, ProviderError> {
        if self.fail_watch.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.watches.lock().await.push(labels.clone());
        Ok(WatchResponse {
            history_id: self.history_id.load(Ordering::SeqCst),
            expiration: None,
        })
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_history(&self, start_history_id: u64) -> Result<Vec<HistoryRecord>, ProviderError> {
        self.history_requests.lock().await.push(start_history_id);
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        Ok(self
            .history
            .lock()
            .await
            .iter()
            .filter(|r| r.id.parse::<u64>().map_or(true, |id| id > start_history_id))
            .cloned()
            .collect())
    }

    async fn get_raw_message(&self, id: &str) -> Result<RawMessage, ProviderError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.messages
            .lock()
            .await
            .iter()
            .find(|m| m.raw.id == id)
            .map(|m| m.raw.clone())
            .ok_or_else(|| ProviderError::Api {
                status: 404,
                message: "Requested entity was not found.".into(),
            })
    }

    async fn find_by_rfc_id(&self, rfc_id: &str) -> Result<Vec<MessageRef>, ProviderError> {
        let wanted = rfc_id.trim().trim_start_matches('<').trim_end_matches('>');
        Ok(self
            .messages
            .lock()
            .await
            .iter()
            .filter(|m| m.rfc_id == wanted)
            .map(|m| MessageRef {
                id: m.raw.id.clone(),
                thread_id: m.raw.thread_id.clone(),
                label_ids: m.raw.label_ids.clone(),
            })
            .collect())
    }

    async fn thread_message_ids(&self, thread_id: &str) -> Result<Vec<String>, ProviderError> {
        Ok(self
            .messages
            .lock()
            .await
            .iter()
            .filter(|m| m.raw.thread_id == thread_id)
            .map(|m| m.raw.id.clone())
            .collect())
    }
}

/// Hands out [`FakeMailbox`]es per user.
#[derive(Default)]
pub struct FakeConnector {
    mailboxes: Mutex<HashMap<String, Arc<FakeMailbox>>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user_id: &str, mailbox: Arc<FakeMailbox>) {
        self.mailboxes
            .lock()
            .await
            .insert(user_id.to_string(), mailbox);
    }

    /// Make `connect` fail for `user_id` as if the credential were revoked.
    pub async fn fail_for(&self, user_id: &str) {
        self.failing.lock().await.insert(user_id.to_string());
    }
}

#[async_trait]
impl MailboxConnector for FakeConnector {
    async fn connect(&self, user_id: &str) -> Result<Arc<dyn MailboxApi>, BridgeError> {
        if self.failing.lock().await.contains(user_id) {
            return Err(BridgeError::Upstream("token has been revoked".into()));
        }
        self.mailboxes
            .lock()
            .await
            .get(user_id)
            .cloned()
            .map(|m| m as Arc<dyn MailboxApi>)
            .ok_or(BridgeError::NotConnected)
    }
}

/// Authorization server double. Code `"bad"` is rejected.
pub struct FakeOAuth {
    email: Mutex<Option<String>>,
}

impl FakeOAuth {
    /// Server whose identity endpoint reports `email`.
    pub fn new(email: &str) -> Self {
        Self {
            email: Mutex::new(Some(email.to_string())),
        }
    }

    /// Report a different account from now on.
    pub async fn set_email(&self, email: &str) {
        *self.email.lock().await = Some(email.to_string());
    }

    /// Make the identity endpoint fail.
    pub async fn fail_identity(&self) {
        *self.email.lock().await = None;
    }
}

#[async_trait]
impl OAuthClient for FakeOAuth {
    fn authorize_url(&self, state: &str) -> Result<String, OAuthError> {
        Ok(format!("https://accounts.example.com/o/oauth2/auth?state={state}"))
    }

    async fn exchange_code(&self, code: &str) -> Result<StoredTokens, OAuthError> {
        if code == "bad" {
            return Err(OAuthError::Rejected {
                status: 400,
                message: "Malformed auth code.".into(),
            });
        }
        Ok(StoredTokens {
            access_token: format!("at-{code}"),
            refresh_token: Some("rt".into()),
            token_type: "Bearer".into(),
            expires_at: None,
            scopes: vec![],
        })
    }

    async fn refresh(&self, tokens: &StoredTokens) -> Result<StoredTokens, OAuthError> {
        Ok(tokens.clone())
    }

    async fn fetch_email(&self, _tokens: &StoredTokens) -> Result<String, OAuthError> {
        self.email
            .lock()
            .await
            .clone()
            .ok_or_else(|| OAuthError::Rejected {
                status: 401,
                message: "Invalid Credentials".into(),
            })
    }
}

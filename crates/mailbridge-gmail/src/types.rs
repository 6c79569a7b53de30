//! Gmail v1 API request and response types.

use serde::{Deserialize, Serialize};

use mailbridge_types::LabelSet;
use mailbridge_types::codec::u64_from_number_or_string;

/// Body of `users.watch`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchRequest {
    pub topic_name: String,
    pub label_ids: Vec<String>,
    pub label_filter_action: String,
}

impl WatchRequest {
    /// Watch restricted to exactly `labels`.
    pub fn include(topic_name: &str, labels: &LabelSet) -> Self {
        Self {
            topic_name: topic_name.to_string(),
            label_ids: labels.iter().map(|l| l.as_str().to_string()).collect(),
            label_filter_action: "include".to_string(),
        }
    }
}

/// Response of `users.watch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchResponse {
    /// Mailbox history position at the time the watch was registered.
    #[serde(deserialize_with = "u64_from_number_or_string")]
    pub history_id: u64,
    /// Watch expiration (milliseconds since epoch, as a string).
    #[serde(default)]
    pub expiration: Option<String>,
}

/// One page of `users.history.list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HistoryPage {
    #[serde(default)]
    pub history: Vec<HistoryRecord>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// A single mailbox change record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: String,
    #[serde(default)]
    pub messages_added: Vec<HistoryMessage>,
}

impl HistoryRecord {
    /// Ids of the messages this record added.
    pub fn added_message_ids(&self) -> Vec<String> {
        self.messages_added
            .iter()
            .map(|m| m.message.id.clone())
            .collect()
    }
}

/// Wrapper used by `messagesAdded`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub message: MessageRef,
}

/// Reference to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub label_ids: Vec<String>,
}

/// Response of `users.messages.list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessageList {
    #[serde(default)]
    pub messages: Vec<MessageRef>,
}

/// Response of `users.threads.get?format=minimal`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Thread {
    #[serde(default)]
    pub messages: Vec<MessageRef>,
}

/// A message fetched with `format=raw`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub label_ids: Vec<String>,
    /// Base64url-encoded RFC 822 message.
    #[serde(default)]
    pub raw: String,
}

impl RawMessage {
    /// Whether any of the message's labels is in `labels`.
    pub fn has_any_label(&self, labels: &LabelSet) -> bool {
        self.label_ids
            .iter()
            .any(|id| labels.iter().any(|l| l.as_str() == id))
    }
}

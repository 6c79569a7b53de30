//! Push-notification wire types.
//!
//! The provider publishes mailbox changes to a Pub/Sub topic, which pushes
//! them to the webhook as:
//!
//! ```json
//! { "message": { "data": "<base64 JSON>", "messageId": "...", "publishTime": "..." },
//!   "subscription": "projects/p/subscriptions/s" }
//! ```
//!
//! where the decoded `data` is `{"emailAddress": "...", "historyId": 1234}`.

use serde::{Deserialize, Serialize};

use crate::codec::{decode_base64, u64_from_number_or_string};
use crate::error::BridgeError;

/// Outer Pub/Sub push body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEnvelope {
    pub message: PushMessage,
    #[serde(default)]
    pub subscription: Option<String>,
}

/// The Pub/Sub message inside a push body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    /// Base64-encoded [`MailNotification`] JSON.
    pub data: String,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub publish_time: Option<String>,
}

/// Decoded change notification for one mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailNotification {
    pub email_address: String,
    #[serde(deserialize_with = "u64_from_number_or_string")]
    pub history_id: u64,
}

impl MailNotification {
    /// Parse a raw push body. Every failure is [`BridgeError::BadNotification`].
    pub fn from_push_body(body: &[u8]) -> Result<Self, BridgeError> {
        let envelope: PushEnvelope = serde_json::from_slice(body)
            .map_err(|e| BridgeError::BadNotification(format!("envelope: {e}")))?;
        let data = decode_base64(&envelope.message.data)
            .map_err(|e| BridgeError::BadNotification(format!("data: {e}")))?;
        let notification: MailNotification = serde_json::from_slice(&data)
            .map_err(|e| BridgeError::BadNotification(format!("payload: {e}")))?;
        if notification.email_address.trim().is_empty() {
            return Err(BridgeError::BadNotification("empty emailAddress".into()));
        }
        Ok(notification)
    }
}

//! Post and interactive-message types.
//!
//! The JSON shapes follow the Mattermost post API: interactive buttons live in
//! `props.attachments[].actions[]` and call back to an integration URL with a
//! free-form `context` object.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum number of files one post may carry.
pub const MAX_FILES_PER_POST: usize = 5;

/// A chat post.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// Server-assigned id; empty before creation.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Author.
    #[serde(default)]
    pub user_id: String,
    pub channel_id: String,
    /// Thread root; empty for a top-level post.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub root_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub props: Map<String, Value>,
}

impl Post {
    /// A top-level post by `user_id` in `channel_id`.
    pub fn new(
        user_id: impl Into<String>,
        channel_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            channel_id: channel_id.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    /// Make this post a reply in the thread rooted at `root_id`.
    pub fn in_thread(mut self, root_id: impl Into<String>) -> Self {
        self.root_id = root_id.into();
        self
    }

    pub fn with_files(mut self, file_ids: Vec<String>) -> Self {
        self.file_ids = file_ids;
        self
    }

    /// Attach interactive message attachments (buttons).
    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        let value = serde_json::to_value(attachments).unwrap_or(Value::Array(Vec::new()));
        self.props.insert("attachments".into(), value);
        self
    }

    /// Attachments stored in `props`, if any parse.
    pub fn attachments(&self) -> Vec<Attachment> {
        self.props
            .get("attachments")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }
}

/// A message attachment carrying action buttons.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pretext: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionButton>,
}

/// A button that POSTs its `context` to `integration.url` when clicked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionButton {
    pub id: String,
    pub name: String,
    pub integration: Integration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Integration {
    pub url: String,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl ActionButton {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
        context: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            integration: Integration {
                url: url.into(),
                context,
            },
        }
    }
}

/// Body the chat server POSTs to an integration URL when a button is clicked.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub post_id: String,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl ActionRequest {
    /// String value of a context key.
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(Value::as_str)
    }
}

/// Reply to an [`ActionRequest`]; `update` replaces the clicked post.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<PostUpdate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ephemeral_text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostUpdate {
    pub message: String,
    /// Empty props strip the buttons from the updated post.
    pub props: Map<String, Value>,
}

impl ActionResponse {
    /// Replace the clicked post's text and drop its buttons.
    pub fn update_message(message: impl Into<String>) -> Self {
        Self {
            update: Some(PostUpdate {
                message: message.into(),
                props: Map::new(),
            }),
            ephemeral_text: None,
        }
    }
}

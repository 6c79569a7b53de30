//! Mattermost REST API client.
//!
//! [`MattermostClient`] implements [`MessagePoster`] with the v4 REST API,
//! authenticated with a bot access token:
//!
//! - `POST /api/v4/posts`
//! - `POST /api/v4/posts/ephemeral`
//! - `POST /api/v4/files?channel_id=..&filename=..`
//! - `POST /api/v4/channels/direct`
//!
//! The author of a created post is the token's account. `Post::user_id` is
//! sent along and honored only when the token may post on behalf of others.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use mailbridge_types::config::BridgeConfig;
use mailbridge_types::error::ChannelError;

use crate::traits::MessagePoster;
use crate::types::Post;

/// HTTP client for the Mattermost v4 API.
pub struct MattermostClient {
    http: Client,
    base_url: String,
    bot_token: String,
    bot_user_id: String,
}

#[derive(Deserialize)]
struct FileUploadResponse {
    #[serde(default)]
    file_infos: Vec<FileInfo>,
}

#[derive(Deserialize)]
struct FileInfo {
    id: String,
}

#[derive(Deserialize)]
struct ChannelResponse {
    id: String,
}

impl MattermostClient {
    pub fn new(
        http: Client,
        server_url: impl Into<String>,
        bot_token: impl Into<String>,
        bot_user_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: server_url.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
            bot_user_id: bot_user_id.into(),
        }
    }

    /// Build from the `chat` section of the configuration.
    pub fn from_config(config: &BridgeConfig, http: Client) -> Self {
        Self::new(
            http,
            config.chat.server_url.clone(),
            config.chat.bot_token.expose(),
            config.chat.bot_user_id.clone(),
        )
    }

    /// Return the base URL used for API requests.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v4/{path}", self.base_url)
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ChannelError> {
        let response = builder
            .bearer_auth(&self.bot_token)
            .send()
            .await
            .map_err(|e| ChannelError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ChannelError::RequestFailed(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(String::from))
                .unwrap_or(text);
            return Err(ChannelError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&text).map_err(|e| ChannelError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl MessagePoster for MattermostClient {
    fn bot_user_id(&self) -> &str {
        &self.bot_user_id
    }

    async fn create_post(&self, post: &Post) -> Result<Post, ChannelError> {
        debug!(channel_id = %post.channel_id, root_id = %post.root_id, "creating post");
        self.send(self.http.post(self.url("posts")).json(post)).await
    }

    async fn send_ephemeral(&self, user_id: &str, post: &Post) -> Result<(), ChannelError> {
        debug!(user_id = %user_id, channel_id = %post.channel_id, "sending ephemeral post");
        let body = serde_json::json!({ "user_id": user_id, "post": post });
        let _: Value = self
            .send(self.http.post(self.url("posts/ephemeral")).json(&body))
            .await?;
        Ok(())
    }

    async fn upload_file(
        &self,
        channel_id: &str,
        filename: &str,
        data: &[u8],
    ) -> Result<String, ChannelError> {
        debug!(channel_id = %channel_id, filename = %filename, bytes = data.len(), "uploading file");
        let request = self
            .http
            .post(self.url("files"))
            .query(&[("channel_id", channel_id), ("filename", filename)])
            .header("Content-Type", "application/octet-stream")
            .body(data.to_vec());
        let response: FileUploadResponse = self.send(request).await?;
        response
            .file_infos
            .into_iter()
            .next()
            .map(|info| info.id)
            .ok_or_else(|| ChannelError::InvalidResponse("upload returned no file info".into()))
    }

    async fn direct_channel(&self, user_id: &str) -> Result<String, ChannelError> {
        let members = [self.bot_user_id.as_str(), user_id];
        let channel: ChannelResponse = self
            .send(self.http.post(self.url("channels/direct")).json(&members))
            .await?;
        Ok(channel.id)
    }
}

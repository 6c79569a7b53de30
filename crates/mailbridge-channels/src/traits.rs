//! The posting seam between the bridge and the chat platform.

use async_trait::async_trait;

use mailbridge_types::error::ChannelError;

use crate::types::Post;

/// Everything the bridge needs from the chat platform.
///
/// Implementations must be safe to share across request handlers.
#[async_trait]
pub trait MessagePoster: Send + Sync {
    /// User id of the bot account.
    fn bot_user_id(&self) -> &str;

    /// Create a post; returns it with its server-assigned id.
    async fn create_post(&self, post: &Post) -> Result<Post, ChannelError>;

    /// Show `post` to `user_id` only.
    async fn send_ephemeral(&self, user_id: &str, post: &Post) -> Result<(), ChannelError>;

    /// Upload a file into `channel_id`; returns the file id to attach to a post.
    async fn upload_file(
        &self,
        channel_id: &str,
        filename: &str,
        data: &[u8],
    ) -> Result<String, ChannelError>;

    /// Id of the direct-message channel between the bot and `user_id`.
    async fn direct_channel(&self, user_id: &str) -> Result<String, ChannelError>;
}

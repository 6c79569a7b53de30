//! In-process [`MessagePoster`].
//!
//! Records every post, ephemeral message and upload instead of sending it.
//! Used by the `serve --dry-run` mode and throughout the test suites. Posting
//! and uploading can be switched to fail to exercise error paths.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use mailbridge_types::error::ChannelError;

use crate::traits::MessagePoster;
use crate::types::Post;

/// A recorded file upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub channel_id: String,
    pub filename: String,
    pub file_id: String,
    pub size: usize,
}

/// Recording poster.
pub struct MemoryPoster {
    bot_user_id: String,
    posts: Mutex<Vec<Post>>,
    ephemerals: Mutex<Vec<(String, Post)>>,
    uploads: Mutex<Vec<Upload>>,
    counter: AtomicUsize,
    /// Remaining successful `create_post` calls before failing; `usize::MAX` = never fail.
    posts_before_failure: AtomicUsize,
    fail_uploads: AtomicBool,
}

impl MemoryPoster {
    pub fn new(bot_user_id: impl Into<String>) -> Self {
        Self {
            bot_user_id: bot_user_id.into(),
            posts: Mutex::new(Vec::new()),
            ephemerals: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
            posts_before_failure: AtomicUsize::new(usize::MAX),
            fail_uploads: AtomicBool::new(false),
        }
    }

    /// Let `n` more posts succeed, then reject every later one.
    pub fn fail_posts_after(&self, n: usize) {
        self.posts_before_failure.store(n, Ordering::SeqCst);
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Posts created so far, in order.
    pub async fn posts(&self) -> Vec<Post> {
        self.posts.lock().await.clone()
    }

    /// Ephemeral posts as `(recipient, post)`.
    pub async fn ephemerals(&self) -> Vec<(String, Post)> {
        self.ephemerals.lock().await.clone()
    }

    /// Ephemeral messages shown to `user_id`.
    pub async fn ephemeral_messages_for(&self, user_id: &str) -> Vec<String> {
        self.ephemerals
            .lock()
            .await
            .iter()
            .filter(|(to, _)| to == user_id)
            .map(|(_, post)| post.message.clone())
            .collect()
    }

    pub async fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().await.clone()
    }

    /// Name of the DM channel this poster hands out for `user_id`.
    pub fn dm_channel_name(user_id: &str) -> String {
        format!("dm_{user_id}")
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{prefix}{n}")
    }

    fn take_post_slot(&self) -> bool {
        self.posts_before_failure
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

#[async_trait]
impl MessagePoster for MemoryPoster {
    fn bot_user_id(&self) -> &str {
        &self.bot_user_id
    }

    async fn create_post(&self, post: &Post) -> Result<Post, ChannelError> {
        if !self.take_post_slot() {
            return Err(ChannelError::Rejected {
                status: 500,
                message: "post rejected".into(),
            });
        }
        let mut created = post.clone();
        created.id = self.next_id("post");
        info!(channel_id = %created.channel_id, post_id = %created.id, "recorded post");
        self.posts.lock().await.push(created.clone());
        Ok(created)
    }

    async fn send_ephemeral(&self, user_id: &str, post: &Post) -> Result<(), ChannelError> {
        self.ephemerals
            .lock()
            .await
            .push((user_id.to_string(), post.clone()));
        Ok(())
    }

    async fn upload_file(
        &self,
        channel_id: &str,
        filename: &str,
        data: &[u8],
    ) -> Result<String, ChannelError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(ChannelError::Rejected {
                status: 413,
                message: "file too large".into(),
            });
        }
        let file_id = self.next_id("file");
        self.uploads.lock().await.push(Upload {
            channel_id: channel_id.to_string(),
            filename: filename.to_string(),
            file_id: file_id.clone(),
            size: data.len(),
        });
        Ok(file_id)
    }

    async fn direct_channel(&self, user_id: &str) -> Result<String, ChannelError> {
        Ok(Self::dm_channel_name(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_posts_with_ids() {
        let poster = MemoryPoster::new("bot");
        let a = poster.create_post(&Post::new("bot", "c", "one")).await.unwrap();
        let b = poster.create_post(&Post::new("bot", "c", "two")).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(poster.posts().await.len(), 2);
    }

    #[tokio::test]
    async fn posts_fail_after_limit() {
        let poster = MemoryPoster::new("bot");
        poster.fail_posts_after(1);
        assert!(poster.create_post(&Post::new("bot", "c", "ok")).await.is_ok());
        assert!(poster.create_post(&Post::new("bot", "c", "no")).await.is_err());
        assert_eq!(poster.posts().await.len(), 1);
    }

    #[tokio::test]
    async fn ephemerals_filtered_by_recipient() {
        let poster = MemoryPoster::new("bot");
        poster.send_ephemeral("u1", &Post::new("bot", "c", "hi u1")).await.unwrap();
        poster.send_ephemeral("u2", &Post::new("bot", "c", "hi u2")).await.unwrap();
        assert_eq!(poster.ephemeral_messages_for("u1").await, vec!["hi u1".to_string()]);
    }

    #[tokio::test]
    async fn uploads_can_fail() {
        let poster = MemoryPoster::new("bot");
        poster.fail_uploads(true);
        assert!(poster.upload_file("c", "a.txt", b"x").await.is_err());
        assert!(poster.uploads().await.is_empty());
    }
}

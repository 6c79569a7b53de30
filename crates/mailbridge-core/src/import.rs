//! Posting mail into chat as threads.
//!
//! [`Importer::post_thread`] turns an ordered list of raw messages into one
//! chat thread: the first message is the root, later ones are replies, and
//! attachments follow as replies carrying at most
//! [`MAX_FILES_PER_POST`] files each. It is shared by notification delivery
//! and the `import` command, which first resolves an RFC Message-ID with
//! [`Importer::import_mail`] or [`Importer::import_thread`].

use std::sync::Arc;

use tracing::{debug, info, warn};

use mailbridge_channels::types::MAX_FILES_PER_POST;
use mailbridge_channels::{MessagePoster, Post};
use mailbridge_gmail::mime::{ParsedEmail, decode_raw, parse_email};
use mailbridge_gmail::{MailboxApi, RawMessage};
use mailbridge_types::BridgeError;

/// Shown instead of the sender when no display name could be extracted.
pub const UNKNOWN_SENDER: &str = "_Could not fetch names_";

/// Where a thread comes from; notifications carry an import hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Notification,
    Import,
}

pub struct Importer {
    poster: Arc<dyn MessagePoster>,
    command_trigger: String,
}

impl Importer {
    pub fn new(poster: Arc<dyn MessagePoster>, command_trigger: impl Into<String>) -> Self {
        Self {
            poster,
            command_trigger: command_trigger.into(),
        }
    }

    /// Post `messages` as one thread in `channel_id` authored by `author_id`.
    ///
    /// Stops at the first decode, parse or post failure; posts already
    /// created stay. Returns the ids of the created posts.
    pub async fn post_thread(
        &self,
        messages: &[RawMessage],
        channel_id: &str,
        author_id: &str,
        origin: Origin,
    ) -> Result<Vec<String>, BridgeError> {
        let mut created = Vec::new();
        let mut root_id: Option<String> = None;

        for raw in messages {
            let email = parse_email(&decode_raw(&raw.raw)?)?;
            let text = self.render(&email, origin);

            let mut post = Post::new(author_id, channel_id, text);
            if let Some(root) = &root_id {
                post = post.in_thread(root.clone());
            }
            let post = self.poster.create_post(&post).await?;
            let root = root_id.get_or_insert_with(|| post.id.clone()).clone();
            created.push(post.id);

            let file_ids = self.upload_attachments(&email, channel_id).await;
            for batch in file_ids.chunks(MAX_FILES_PER_POST) {
                let reply = Post::new(author_id, channel_id, "")
                    .in_thread(root.clone())
                    .with_files(batch.to_vec());
                created.push(self.poster.create_post(&reply).await?.id);
            }
            debug!(message_id = %raw.id, channel_id = %channel_id, "message posted");
        }

        info!(
            channel_id = %channel_id,
            messages = messages.len(),
            posts = created.len(),
            "thread posted"
        );
        Ok(created)
    }

    /// Import the single message whose Message-ID is `rfc_id`.
    pub async fn import_mail(
        &self,
        api: &dyn MailboxApi,
        rfc_id: &str,
        channel_id: &str,
        user_id: &str,
    ) -> Result<Vec<String>, BridgeError> {
        let found = api.find_by_rfc_id(rfc_id).await?;
        let [message] = found.as_slice() else {
            return Err(BridgeError::MessageNotFound(
                "Invalid ID. Please provide a valid mail ID".into(),
            ));
        };
        let raw = api.get_raw_message(&message.id).await?;
        self.post_thread(&[raw], channel_id, user_id, Origin::Import)
            .await
    }

    /// Import every message of the thread containing the Message-ID `rfc_id`.
    pub async fn import_thread(
        &self,
        api: &dyn MailboxApi,
        rfc_id: &str,
        channel_id: &str,
        user_id: &str,
    ) -> Result<Vec<String>, BridgeError> {
        let found = api.find_by_rfc_id(rfc_id).await?;
        let [message] = found.as_slice() else {
            return Err(BridgeError::MessageNotFound(
                "Invalid ID. Please provide ID of some mail in the thread".into(),
            ));
        };

        let ids = api.thread_message_ids(&message.thread_id).await?;
        let mut messages = Vec::with_capacity(ids.len());
        for id in &ids {
            messages.push(api.get_raw_message(id).await?);
        }
        self.post_thread(&messages, channel_id, user_id, Origin::Import)
            .await
    }

    async fn upload_attachments(&self, email: &ParsedEmail, channel_id: &str) -> Vec<String> {
        let mut file_ids = Vec::with_capacity(email.attachments.len());
        for attachment in &email.attachments {
            match self
                .poster
                .upload_file(channel_id, &attachment.filename, &attachment.data)
                .await
            {
                Ok(id) => file_ids.push(id),
                Err(e) => warn!(
                    channel_id = %channel_id,
                    filename = %attachment.filename,
                    error = %e,
                    "attachment upload failed, skipping"
                ),
            }
        }
        file_ids
    }

    fn render(&self, email: &ParsedEmail, origin: Origin) -> String {
        let from = if email.from.is_empty() {
            UNKNOWN_SENDER
        } else {
            email.from.as_str()
        };

        let mut text = format!("###### Email from: {from}\n\n");
        if origin == Origin::Notification {
            if let Some(id) = &email.message_id {
                text.push_str(&format!(
                    "**Message ID: {id}**. _(Import in any channel using `/{} import <mail/thread> <ID>`)_\n\n",
                    self.command_trigger
                ));
            }
        }
        if let Some(date) = &email.date {
            text.push_str(&format!("**Date: {date}**\n\n"));
        }
        text.push_str(&format!("**Subject: {}**\n\n", email.subject));
        text.push_str(&email.body);
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeMailbox, rfc822};
    use mailbridge_channels::MemoryPoster;

    fn importer(poster: &Arc<MemoryPoster>) -> Importer {
        Importer::new(poster.clone(), "gmail")
    }

    fn raw(id: &str, text: &str) -> RawMessage {
        use base64::Engine;
        RawMessage {
            id: id.into(),
            thread_id: "t1".into(),
            label_ids: vec!["INBOX".into()],
            raw: base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(text),
        }
    }

    fn with_attachments(count: usize) -> String {
        let mut text = String::from(
            "From: Alice <a@example.com>\r\nSubject: files\r\nMessage-ID: <f@x>\r\n\
             Content-Type: multipart/mixed; boundary=\"b\"\r\n\r\n\
             --b\r\nContent-Type: text/plain\r\n\r\nsee attached\r\n",
        );
        for i in 0..count {
            text.push_str(&format!(
                "--b\r\nContent-Type: text/plain\r\nContent-Disposition: attachment; filename=\"f{i}.txt\"\r\n\r\ncontent {i}\r\n"
            ));
        }
        text.push_str("--b--\r\n");
        text
    }

    #[tokio::test]
    async fn first_message_is_root_and_rest_reply() {
        let poster = Arc::new(MemoryPoster::new("bot"));
        let messages = vec![
            raw("m1", &rfc822("Alice <a@example.com>", "Hello", "one@x", "first")),
            raw("m2", &rfc822("Bob <b@example.com>", "Re: Hello", "two@x", "second")),
        ];

        let ids = importer(&poster)
            .post_thread(&messages, "ch1", "u1", Origin::Import)
            .await
            .unwrap();

        let posts = poster.posts().await;
        assert_eq!(ids.len(), 2);
        assert!(posts[0].root_id.is_empty());
        assert_eq!(posts[1].root_id, posts[0].id);
        assert_eq!(posts[0].user_id, "u1");
        assert!(posts[0].message.starts_with("###### Email from: Alice"));
        assert!(posts[0].message.contains("**Subject: Hello**"));
        assert!(posts[0].message.contains("**Date: March 3, 2020**"));
        assert!(!posts[0].message.contains("Message ID"));
    }

    #[tokio::test]
    async fn notifications_carry_import_hint() {
        let poster = Arc::new(MemoryPoster::new("bot"));
        let messages = vec![raw("m1", &rfc822("a@example.com", "Hi", "hint@x", "body"))];

        importer(&poster)
            .post_thread(&messages, "dm", "bot", Origin::Notification)
            .await
            .unwrap();

        let message = &poster.posts().await[0].message;
        assert!(message.contains("**Message ID: hint@x**"));
        assert!(message.contains("`/gmail import <mail/thread> <ID>`"));
        assert!(message.contains(UNKNOWN_SENDER));
    }

    #[tokio::test]
    async fn attachments_are_batched_five_per_reply() {
        let poster = Arc::new(MemoryPoster::new("bot"));
        let messages = vec![raw("m1", &with_attachments(7))];

        importer(&poster)
            .post_thread(&messages, "ch1", "u1", Origin::Import)
            .await
            .unwrap();

        let posts = poster.posts().await;
        assert_eq!(poster.uploads().await.len(), 7);
        assert_eq!(posts.len(), 3);
        assert_eq!(posts[1].file_ids.len(), 5);
        assert_eq!(posts[2].file_ids.len(), 2);
        assert!(posts[1..].iter().all(|p| p.root_id == posts[0].id));
    }

    #[tokio::test]
    async fn failed_uploads_are_skipped() {
        let poster = Arc::new(MemoryPoster::new("bot"));
        poster.fail_uploads(true);
        let messages = vec![raw("m1", &with_attachments(2))];

        importer(&poster)
            .post_thread(&messages, "ch1", "u1", Origin::Import)
            .await
            .unwrap();
        assert_eq!(poster.posts().await.len(), 1);
    }

    #[tokio::test]
    async fn bad_payload_aborts_but_keeps_earlier_posts() {
        let poster = Arc::new(MemoryPoster::new("bot"));
        let mut broken = raw("m2", "");
        broken.raw = "***".into();
        let messages = vec![raw("m1", &rfc822("A <a@x>", "ok", "ok@x", "fine")), broken];

        let err = importer(&poster)
            .post_thread(&messages, "ch1", "u1", Origin::Import)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::MalformedMessage(_)));
        assert_eq!(poster.posts().await.len(), 1);
    }

    #[tokio::test]
    async fn import_mail_requires_exactly_one_match() {
        let poster = Arc::new(MemoryPoster::new("bot"));
        let mailbox = FakeMailbox::new(1);

        let err = importer(&poster)
            .import_mail(&mailbox, "<missing@x>", "ch1", "u1")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::MessageNotFound(ref m) if m.starts_with("Invalid ID")));
    }

    #[tokio::test]
    async fn import_thread_posts_every_message() {
        let poster = Arc::new(MemoryPoster::new("bot"));
        let mailbox = FakeMailbox::new(1);
        mailbox
            .add_message("m1", "t9", &["INBOX"], &rfc822("A <a@x>", "Plan", "p1@x", "one"))
            .await;
        mailbox
            .add_message("m2", "t9", &["INBOX"], &rfc822("B <b@x>", "Re: Plan", "p2@x", "two"))
            .await;
        mailbox
            .add_message("m3", "other", &["INBOX"], &rfc822("C <c@x>", "Other", "p3@x", "three"))
            .await;

        let ids = importer(&poster)
            .import_thread(&mailbox, "<p2@x>", "ch1", "u1")
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        let posts = poster.posts().await;
        assert!(posts[0].message.contains("**Subject: Plan**"));
        assert!(posts[1].message.contains("**Subject: Re: Plan**"));
    }
}

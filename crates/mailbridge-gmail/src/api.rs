//! Gmail REST API client.
//!
//! [`GmailApiClient`] provides typed methods for the subset of the Gmail v1
//! API the bridge uses. Every call addresses the authenticated mailbox
//! (`users/me`), so one client is bound to one user's access token.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use mailbridge_types::LabelSet;
use mailbridge_types::error::ProviderError;

use crate::types::{
    HistoryPage, HistoryRecord, MessageList, MessageRef, RawMessage, Thread, WatchRequest,
    WatchResponse,
};

/// Default base URL for the Gmail v1 API.
pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

/// Operations on one user's mailbox.
#[async_trait]
pub trait MailboxApi: Send + Sync {
    /// Register (or replace) the push watch for exactly `labels`.
    async fn watch(&self, labels: &LabelSet, topic: &str) -> Result<WatchResponse, ProviderError>;

    /// Stop push notifications for the mailbox.
    async fn stop(&self) -> Result<(), ProviderError>;

    /// All history records after `start_history_id`, oldest first.
    async fn list_history(&self, start_history_id: u64) -> Result<Vec<HistoryRecord>, ProviderError>;

    /// Fetch one message in raw (RFC 822, base64url) form.
    async fn get_raw_message(&self, id: &str) -> Result<RawMessage, ProviderError>;

    /// Messages whose `Message-ID` header equals `rfc_id`.
    async fn find_by_rfc_id(&self, rfc_id: &str) -> Result<Vec<MessageRef>, ProviderError>;

    /// Ids of every message in a thread, in thread order.
    async fn thread_message_ids(&self, thread_id: &str) -> Result<Vec<String>, ProviderError>;
}

/// HTTP client for the Gmail v1 API.
pub struct GmailApiClient {
    http: Client,
    access_token: String,
    base_url: String,
}

impl GmailApiClient {
    /// Client for the public API endpoint.
    pub fn new(http: Client, access_token: impl Into<String>) -> Self {
        Self::with_base_url(http, access_token, GMAIL_API_BASE)
    }

    /// Client pointing at a custom base URL (configuration or tests).
    pub fn with_base_url(
        http: Client,
        access_token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            access_token: access_token.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Return the base URL used for API requests.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/users/me/{path}", self.base_url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.access_token)
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ProviderError> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: api_error_message(&text),
            });
        }

        let body = if text.trim().is_empty() { "{}" } else { text.as_str() };
        serde_json::from_str(body).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

/// Extract `error.message` from a Google error body, or fall back to the text.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(String::from)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl MailboxApi for GmailApiClient {
    async fn watch(&self, labels: &LabelSet, topic: &str) -> Result<WatchResponse, ProviderError> {
        let request = WatchRequest::include(topic, labels);
        debug!(labels = ?request.label_ids, "calling users.watch");
        self.send(self.http.post(self.url("watch")).json(&request))
            .await
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        debug!("calling users.stop");
        let _: Value = self.send(self.http.post(self.url("stop"))).await?;
        Ok(())
    }

    async fn list_history(&self, start_history_id: u64) -> Result<Vec<HistoryRecord>, ProviderError> {
        let start = start_history_id.to_string();
        let mut records = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(self.url("history"))
                .query(&[("startHistoryId", start.as_str())]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let page: HistoryPage = self.send(request).await?;
            records.extend(page.history);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(start_history_id, records = records.len(), "history listed");
        Ok(records)
    }

    async fn get_raw_message(&self, id: &str) -> Result<RawMessage, ProviderError> {
        let request = self
            .http
            .get(self.url(&format!("messages/{id}")))
            .query(&[("format", "raw")]);
        let message: RawMessage = self.send(request).await?;
        if message.raw.is_empty() {
            return Err(ProviderError::InvalidResponse(format!(
                "message {id} has no raw payload"
            )));
        }
        Ok(message)
    }

    async fn find_by_rfc_id(&self, rfc_id: &str) -> Result<Vec<MessageRef>, ProviderError> {
        let bare = rfc_id.trim().trim_start_matches('<').trim_end_matches('>');
        let query = format!("rfc822msgid:{bare}");
        let request = self
            .http
            .get(self.url("messages"))
            .query(&[("q", query.as_str())]);
        let list: MessageList = self.send(request).await?;
        Ok(list.messages)
    }

    async fn thread_message_ids(&self, thread_id: &str) -> Result<Vec<String>, ProviderError> {
        let request = self
            .http
            .get(self.url(&format!("threads/{thread_id}")))
            .query(&[("format", "minimal")]);
        let thread: Thread = self.send(request).await?;
        Ok(thread.messages.into_iter().map(|m| m.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailbridge_types::Label;
    use mockito::Matcher;

    fn client(server: &mockito::ServerGuard) -> GmailApiClient {
        GmailApiClient::with_base_url(Client::new(), "tok", server.url())
    }

    #[tokio::test]
    async fn watch_posts_labels_and_topic() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/users/me/watch")
            .match_header("authorization", "Bearer tok")
            .match_body(Matcher::Json(serde_json::json!({
                "topicName": "projects/p/topics/t",
                "labelIds": ["INBOX"],
                "labelFilterAction": "include"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"historyId":"1234","expiration":"1700000000000"}"#)
            .create_async()
            .await;

        let labels: LabelSet = [Label::Inbox].into_iter().collect();
        let resp = client(&server)
            .watch(&labels, "projects/p/topics/t")
            .await
            .unwrap();
        assert_eq!(resp.history_id, 1234);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn stop_accepts_empty_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/users/me/stop")
            .with_status(204)
            .create_async()
            .await;

        client(&server).stop().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn history_follows_page_tokens() {
        let mut server = mockito::Server::new_async().await;
        let page_one = server
            .mock("GET", "/users/me/history")
            .match_query(Matcher::Exact("startHistoryId=40".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"history":[{"id":"41"}],"nextPageToken":"p2","historyId":"42"}"#)
            .create_async()
            .await;
        let page_two = server
            .mock("GET", "/users/me/history")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("startHistoryId".into(), "40".into()),
                Matcher::UrlEncoded("pageToken".into(), "p2".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"history":[{"id":"42","messagesAdded":[{"message":{"id":"m9","threadId":"t9"}}]}],"historyId":"42"}"#)
            .create_async()
            .await;

        let records = client(&server).list_history(40).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].added_message_ids(), vec!["m9".to_string()]);
        page_one.assert_async().await;
        page_two.assert_async().await;
    }

    #[tokio::test]
    async fn empty_history_is_empty_vec() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/users/me/history")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"historyId":"50"}"#)
            .create_async()
            .await;

        assert!(client(&server).list_history(50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn api_errors_carry_google_message() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/users/me/messages/nope")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":{"code":404,"message":"Requested entity was not found.","status":"NOT_FOUND"}}"#)
            .create_async()
            .await;

        let err = client(&server).get_raw_message("nope").await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Api { status: 404, ref message } if message == "Requested entity was not found."
        ));
    }

    #[tokio::test]
    async fn get_raw_message_requests_raw_format() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/users/me/messages/m1")
            .match_query(Matcher::UrlEncoded("format".into(), "raw".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"m1","threadId":"t1","labelIds":["INBOX"],"raw":"U3ViamVjdDogaGk"}"#)
            .create_async()
            .await;

        let msg = client(&server).get_raw_message("m1").await.unwrap();
        assert_eq!(msg.thread_id, "t1");
        assert_eq!(msg.label_ids, vec!["INBOX".to_string()]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn find_by_rfc_id_strips_angle_brackets() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/users/me/messages")
            .match_query(Matcher::UrlEncoded(
                "q".into(),
                "rfc822msgid:abc@mail.example.com".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"messages":[{"id":"m1","threadId":"t1"}],"resultSizeEstimate":1}"#)
            .create_async()
            .await;

        let found = client(&server)
            .find_by_rfc_id("<abc@mail.example.com>")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].thread_id, "t1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn thread_ids_in_order() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/users/me/threads/t1")
            .match_query(Matcher::UrlEncoded("format".into(), "minimal".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"t1","messages":[{"id":"a","threadId":"t1"},{"id":"b","threadId":"t1"}]}"#)
            .create_async()
            .await;

        let ids = client(&server).thread_message_ids("t1").await.unwrap();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }
}

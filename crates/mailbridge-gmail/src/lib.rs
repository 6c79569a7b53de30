//! Gmail support for mailbridge.
//!
//! - [`api`] -- the [`MailboxApi`] trait and its REST implementation
//!   ([`GmailApiClient`]): watch/stop, history, raw message and thread fetch,
//!   RFC Message-ID lookup
//! - [`types`] -- request/response shapes of the Gmail v1 API
//! - [`mime`] -- decoding a raw message into subject, senders, date, body and
//!   attachments

pub mod api;
pub mod mime;
pub mod types;

pub use api::{GmailApiClient, MailboxApi};
pub use mime::{Attachment, ParsedEmail};
pub use types::{HistoryRecord, MessageRef, RawMessage, WatchResponse};

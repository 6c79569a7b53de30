//! # mailbridge-core
//!
//! Core engine of the chat-to-Gmail bridge.
//!
//! Contains the OAuth handshake, the label subscription manager, the
//! notification reconciler, mail import and threading, slash commands, and
//! the per-user state they share in the key-value store.

pub mod app;
pub mod commands;
pub mod connector;
pub mod handshake;
pub mod import;
pub mod reconciler;
pub mod store;
pub mod subscriptions;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use app::AppContext;
pub use commands::{CommandArgs, CommandDispatcher};
pub use connector::{GmailConnector, MailboxConnector};
pub use handshake::Handshake;
pub use import::{Importer, Origin};
pub use reconciler::{ReconcileReport, Reconciler, UserOutcome};
pub use store::StateStore;
pub use subscriptions::SubscriptionManager;

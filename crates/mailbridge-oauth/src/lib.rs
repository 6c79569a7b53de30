//! Google OAuth 2.0 support for mailbridge.
//!
//! - [`client`] -- authorization URL, code exchange, refresh and identity
//!   lookup behind the [`OAuthClient`] trait
//! - [`state`] -- single-use anti-forgery tokens bound to a chat user
//! - [`types`] -- the persisted [`StoredTokens`] credential

pub mod client;
pub mod state;
pub mod types;

pub use client::{GoogleOAuthClient, OAuthClient};
pub use types::StoredTokens;

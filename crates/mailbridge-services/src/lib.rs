//! HTTP services for mailbridge.
//!
//! Exposes the OAuth redirect endpoints, the interactive-button and
//! slash-command callbacks, and the provider push webhook as an axum
//! [`Router`](axum::Router) built by [`api::build_router`].

pub mod api;

pub use api::{ApiState, build_router};

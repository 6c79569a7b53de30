//! # mailbridge-types
//!
//! Core type definitions for mailbridge.
//!
//! This crate is the foundation of the dependency graph -- all other
//! mailbridge crates depend on it. It contains:
//!
//! - **[`codec`]** -- Lenient base64 decoding for provider payloads
//! - **[`error`]** -- [`BridgeError`] and the per-subsystem error types
//! - **[`config`]** -- Configuration schema
//! - **[`label`]** -- The mailbox label allow-list and [`LabelSet`]
//! - **[`notification`]** -- Push-notification envelope and payload
//! - **[`secret`]** -- [`SecretString`] for credentials in config

pub mod codec;
pub mod config;
pub mod error;
pub mod label;
pub mod notification;
pub mod secret;

pub use error::{BridgeError, Result};
pub use label::{Label, LabelSet};
pub use secret::SecretString;

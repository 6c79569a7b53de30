//! Chat platform posting for mailbridge.
//!
//! - [`traits`] -- the [`MessagePoster`] trait the core posts through
//! - [`types`] -- posts, interactive buttons and their JSON shapes
//! - [`mattermost`] -- REST implementation against a Mattermost server
//! - [`memory`] -- in-process poster that records what was sent

pub mod mattermost;
pub mod memory;
pub mod traits;
pub mod types;

pub use mattermost::MattermostClient;
pub use memory::MemoryPoster;
pub use traits::MessagePoster;
pub use types::{ActionButton, Attachment, Post};

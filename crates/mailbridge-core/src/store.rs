//! Typed access to per-user state.
//!
//! [`StateStore`] owns the key layout and encodings on top of a [`KvStore`]:
//!
//! | Key | Value |
//! |---|---|
//! | `<token>` | the anti-forgery token itself |
//! | `<user>:mailbox_token` | JSON [`StoredTokens`] |
//! | `<user>:mailbox_address` | mailbox address |
//! | `<address>:users` | JSON array of chat user ids |
//! | `<user>:subscriptions` | JSON array of label ids |
//! | `<user>:history_id` | decimal history cursor |
//!
//! Read-modify-write updates (registry membership, cursor) go through
//! compare-and-set so concurrent requests cannot lose each other's writes.

use std::sync::Arc;

use tracing::debug;

use mailbridge_oauth::{StoredTokens, state};
use mailbridge_platform::kv::KvStore;
use mailbridge_types::LabelSet;
use mailbridge_types::error::StoreError;

/// Attempts before a contended compare-and-set gives up.
const CAS_ATTEMPTS: usize = 16;

fn credential_key(user_id: &str) -> String {
    format!("{user_id}:mailbox_token")
}

fn address_key(user_id: &str) -> String {
    format!("{user_id}:mailbox_address")
}

fn registry_key(address: &str) -> String {
    format!("{address}:users")
}

fn subscriptions_key(user_id: &str) -> String {
    format!("{user_id}:subscriptions")
}

fn cursor_key(user_id: &str) -> String {
    format!("{user_id}:history_id")
}

/// Per-user state on top of a shared key-value store.
#[derive(Clone)]
pub struct StateStore {
    kv: Arc<dyn KvStore>,
}

impl StateStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// The underlying store.
    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.kv.get(key).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| StoreError::Encoding(format!("{key}: {e}"))),
            None => Ok(None),
        }
    }

    // ── Anti-forgery tokens ──────────────────────────────────────────────

    /// Store a pending handshake token under itself.
    pub async fn put_state(&self, token: &str) -> Result<(), StoreError> {
        self.kv.set(token, token.as_bytes()).await
    }

    /// Consume a handshake token: look it up and delete it in one step.
    ///
    /// `Ok(None)` means the token was unknown or not token-shaped. A value
    /// that is not token-shaped is never looked up, so it cannot reach other
    /// keys.
    /// A present entry is returned as stored (possibly empty) so the caller
    /// can compare it.
    pub async fn take_state(&self, token: &str) -> Result<Option<String>, StoreError> {
        if !state::is_well_formed(token) {
            debug!("ignoring malformed state token");
            return Ok(None);
        }
        Ok(self
            .kv
            .take(token)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    // ── Credential ───────────────────────────────────────────────────────

    pub async fn credential(&self, user_id: &str) -> Result<Option<StoredTokens>, StoreError> {
        match self.kv.get(&credential_key(user_id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn set_credential(&self, user_id: &str, tokens: &StoredTokens) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(tokens)?;
        self.kv.set(&credential_key(user_id), &bytes).await
    }

    pub async fn delete_credential(&self, user_id: &str) -> Result<(), StoreError> {
        self.kv.delete(&credential_key(user_id)).await
    }

    // ── Identity ─────────────────────────────────────────────────────────

    pub async fn mailbox_address(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .get_string(&address_key(user_id))
            .await?
            .filter(|a| !a.is_empty()))
    }

    pub async fn set_mailbox_address(&self, user_id: &str, address: &str) -> Result<(), StoreError> {
        self.kv.set(&address_key(user_id), address.as_bytes()).await
    }

    pub async fn delete_mailbox_address(&self, user_id: &str) -> Result<(), StoreError> {
        self.kv.delete(&address_key(user_id)).await
    }

    // ── Registry ─────────────────────────────────────────────────────────

    /// Chat users linked to `address`, in the order they connected.
    pub async fn registry(&self, address: &str) -> Result<Vec<String>, StoreError> {
        match self.kv.get(&registry_key(address)).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    /// Append `user_id` to the registry of `address` unless already present.
    pub async fn add_to_registry(&self, address: &str, user_id: &str) -> Result<(), StoreError> {
        self.update_registry(address, |users| {
            if users.iter().any(|u| u == user_id) {
                return false;
            }
            users.push(user_id.to_string());
            true
        })
        .await
    }

    /// Remove `user_id` from the registry of `address`.
    pub async fn remove_from_registry(&self, address: &str, user_id: &str) -> Result<(), StoreError> {
        self.update_registry(address, |users| {
            let before = users.len();
            users.retain(|u| u != user_id);
            users.len() != before
        })
        .await
    }

    async fn update_registry<F>(&self, address: &str, mut change: F) -> Result<(), StoreError>
    where
        F: FnMut(&mut Vec<String>) -> bool + Send,
    {
        let key = registry_key(address);
        for _ in 0..CAS_ATTEMPTS {
            let current = self.kv.get(&key).await?;
            let mut users: Vec<String> = match &current {
                Some(bytes) => serde_json::from_slice(bytes)?,
                None => Vec::new(),
            };
            if !change(&mut users) {
                return Ok(());
            }
            let new = serde_json::to_vec(&users)?;
            if self
                .kv
                .compare_and_set(&key, current.as_deref(), &new)
                .await?
            {
                debug!(mailbox = %address, users = users.len(), "registry updated");
                return Ok(());
            }
        }
        Err(StoreError::Backend(format!("registry {address} is contended")))
    }

    // ── Subscriptions ────────────────────────────────────────────────────

    /// Labels the user is subscribed to; empty when none.
    pub async fn subscriptions(&self, user_id: &str) -> Result<LabelSet, StoreError> {
        match self.kv.get(&subscriptions_key(user_id)).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(LabelSet::new()),
        }
    }

    pub async fn set_subscriptions(&self, user_id: &str, labels: &LabelSet) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(labels)?;
        self.kv.set(&subscriptions_key(user_id), &bytes).await
    }

    pub async fn delete_subscriptions(&self, user_id: &str) -> Result<(), StoreError> {
        self.kv.delete(&subscriptions_key(user_id)).await
    }

    // ── History cursor ───────────────────────────────────────────────────

    pub async fn cursor(&self, user_id: &str) -> Result<Option<u64>, StoreError> {
        match self.get_string(&cursor_key(user_id)).await? {
            Some(text) => text
                .trim()
                .parse()
                .map(Some)
                .map_err(|e| StoreError::Encoding(format!("history cursor: {e}"))),
            None => Ok(None),
        }
    }

    /// Move the cursor forward to `history_id`.
    ///
    /// A value at or below the stored one is ignored. Returns whether the
    /// stored cursor changed.
    pub async fn advance_cursor(&self, user_id: &str, history_id: u64) -> Result<bool, StoreError> {
        let key = cursor_key(user_id);
        let new = history_id.to_string();
        for _ in 0..CAS_ATTEMPTS {
            let current = self.kv.get(&key).await?;
            if let Some(bytes) = &current {
                let stored: u64 = String::from_utf8_lossy(bytes).trim().parse().unwrap_or(0);
                if stored >= history_id {
                    debug!(user_id = %user_id, stored, history_id, "cursor not advanced");
                    return Ok(false);
                }
            }
            if self
                .kv
                .compare_and_set(&key, current.as_deref(), new.as_bytes())
                .await?
            {
                debug!(user_id = %user_id, history_id, "cursor advanced");
                return Ok(true);
            }
        }
        Err(StoreError::Backend(format!("cursor for {user_id} is contended")))
    }

    pub async fn delete_cursor(&self, user_id: &str) -> Result<(), StoreError> {
        self.kv.delete(&cursor_key(user_id)).await
    }
}

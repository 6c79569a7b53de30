//! Anti-forgery tokens for the OAuth redirect.
//!
//! A token is `<15 random alphanumerics>_<chat user id>`. It is stored in the
//! key-value store under itself and consumed by the completion callback; the
//! embedded user id binds the callback to the user who started the flow.
//!
//! Every other store key contains a `:`, so a well-formed token can never
//! name one of them.

use rand::Rng;
use rand::distributions::Alphanumeric;

/// Length of the random prefix.
pub const PREFIX_LEN: usize = 15;

/// Mint a token for `user_id`.
pub fn generate(user_id: &str) -> String {
    let prefix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PREFIX_LEN)
        .map(char::from)
        .collect();
    format!("{prefix}_{user_id}")
}

/// The user id embedded in a token: everything after the first `_`.
///
/// Returns `None` for tokens without a separator or with an empty user part.
pub fn embedded_user(token: &str) -> Option<&str> {
    token
        .split_once('_')
        .map(|(_, user)| user)
        .filter(|user| !user.is_empty())
}

/// Whether `user_id` can be embedded in a token.
pub fn is_valid_user(user_id: &str) -> bool {
    !user_id.is_empty() && !user_id.contains(':')
}

/// Whether `token` has the shape [`generate`] produces: exactly
/// [`PREFIX_LEN`] ASCII alphanumerics, `_`, then a valid user id.
pub fn is_well_formed(token: &str) -> bool {
    match token.split_at_checked(PREFIX_LEN) {
        Some((prefix, rest)) => {
            prefix.bytes().all(|b| b.is_ascii_alphanumeric())
                && rest.strip_prefix('_').is_some_and(is_valid_user)
        }
        None => false,
    }
}

//! Error types for mailbridge.
//!
//! [`BridgeError`] is the error every user-facing operation returns. The
//! narrower types ([`StoreError`], [`ProviderError`], [`OAuthError`],
//! [`ChannelError`], [`MimeError`]) are produced by the individual clients
//! and convert into it with `?`. All are non-exhaustive.

use thiserror::Error;

/// Top-level error type for handshake, subscription, import and
/// notification operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BridgeError {
    // ── Caller errors ────────────────────────────────────────────────

    /// The request carried no authenticated chat user.
    #[error("not authorized")]
    Unauthorized,

    /// The OAuth `state` parameter is unknown, expired, or already used.
    #[error("invalid or expired OAuth state")]
    InvalidState,

    /// The stored anti-forgery token does not match the callback.
    #[error("anti-forgery token mismatch")]
    ForgeryDetected,

    /// The token was issued to a different chat user.
    #[error("OAuth state belongs to a different user")]
    IdentityMismatch,

    /// A label outside the allow-list was requested.
    #[error("unsupported label: {0}")]
    UnsupportedLabel(String),

    /// None of the requested labels are currently subscribed.
    #[error("none of the requested labels are subscribed")]
    NothingToUnsubscribe,

    /// The push-notification body could not be decoded.
    #[error("bad notification: {0}")]
    BadNotification(String),

    /// The chat user has no linked mailbox.
    #[error("no mailbox connected")]
    NotConnected,

    /// No (or more than one) message matched an RFC Message-ID.
    #[error("message not found: {0}")]
    MessageNotFound(String),

    // ── Upstream / local failures ────────────────────────────────────

    /// The authorization code could not be exchanged for a credential.
    #[error("token exchange failed: {0}")]
    ExchangeFailed(String),

    /// The mailbox provider API failed.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// A raw message could not be decoded or parsed.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The key-value store failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The chat platform rejected a post or upload.
    #[error("posting failed: {0}")]
    PostingFailed(String),

    /// One or more onboarding steps failed after a successful exchange.
    #[error("onboarding failed: {0}")]
    OnboardingFailed(String),

    /// Configuration is malformed or incomplete.
    #[error("invalid config: {reason}")]
    ConfigInvalid {
        /// What is wrong with the configuration.
        reason: String,
    },
}

impl BridgeError {
    /// HTTP status code used when this error terminates a request.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthorized | Self::IdentityMismatch => 401,
            Self::ForgeryDetected => 403,
            Self::MessageNotFound(_) => 404,
            Self::InvalidState
            | Self::UnsupportedLabel(_)
            | Self::NothingToUnsubscribe
            | Self::BadNotification(_)
            | Self::NotConnected => 400,
            Self::ExchangeFailed(_)
            | Self::Upstream(_)
            | Self::MalformedMessage(_)
            | Self::PostingFailed(_) => 502,
            Self::Persistence(_) | Self::OnboardingFailed(_) | Self::ConfigInvalid { .. } => 500,
        }
    }

    /// Whether a later retry of the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Upstream(_) | Self::Persistence(_) | Self::PostingFailed(_)
        )
    }
}

/// Key-value store failure.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    /// Underlying I/O error (file-backed store).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Any other backend failure.
    #[error("{0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Encoding(e.to_string())
    }
}

/// Mailbox provider (Gmail REST) failure.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProviderError {
    /// The request could not be sent or timed out.
    #[error("request failed: {0}")]
    Request(String),

    /// The API answered with a non-success status.
    #[error("api error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Provider-supplied error message.
        message: String,
    },

    /// The response body did not have the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// OAuth token endpoint failure.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum OAuthError {
    /// The request could not be sent or timed out.
    #[error("request failed: {0}")]
    Request(String),

    /// The endpoint rejected the grant.
    #[error("rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// `error_description` or `error` from the response.
        message: String,
    },

    /// The response body did not have the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The credential has expired and carries no refresh token.
    #[error("no refresh token available")]
    MissingRefreshToken,

    /// A required client setting (redirect URI, client id) is missing.
    #[error("oauth client not configured: {0}")]
    NotConfigured(String),
}

/// Chat platform failure.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ChannelError {
    /// The request could not be sent or timed out.
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// The chat server rejected the call.
    #[error("rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Server-supplied error message.
        message: String,
    },

    /// The response body did not have the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Raw message decode or MIME parse failure.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MimeError {
    /// The base64url payload was invalid.
    #[error("base64 decode failed: {0}")]
    Base64(String),

    /// The decoded bytes were not a parsable message.
    #[error("mime parse failed: {0}")]
    Parse(String),
}

impl From<StoreError> for BridgeError {
    fn from(e: StoreError) -> Self {
        Self::Persistence(e.to_string())
    }
}

impl From<ProviderError> for BridgeError {
    fn from(e: ProviderError) -> Self {
        Self::Upstream(e.to_string())
    }
}

impl From<OAuthError> for BridgeError {
    fn from(e: OAuthError) -> Self {
        Self::Upstream(e.to_string())
    }
}

impl From<ChannelError> for BridgeError {
    fn from(e: ChannelError) -> Self {
        Self::PostingFailed(e.to_string())
    }
}

impl From<MimeError> for BridgeError {
    fn from(e: MimeError) -> Self {
        Self::MalformedMessage(e.to_string())
    }
}

/// Result alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_errors_map_to_distinct_statuses() {
        assert_eq!(BridgeError::InvalidState.status_code(), 400);
        assert_eq!(BridgeError::ForgeryDetected.status_code(), 403);
        assert_eq!(BridgeError::IdentityMismatch.status_code(), 401);
        assert_eq!(BridgeError::ExchangeFailed("x".into()).status_code(), 502);
        assert_eq!(BridgeError::OnboardingFailed("x".into()).status_code(), 500);
    }

    #[test]
    fn store_error_becomes_persistence() {
        let err: BridgeError = StoreError::Backend("disk full".into()).into();
        assert!(matches!(err, BridgeError::Persistence(ref m) if m == "disk full"));
        assert!(err.is_retryable());
    }

    #[test]
    fn channel_error_becomes_posting_failed() {
        let err: BridgeError = ChannelError::Rejected {
            status: 403,
            message: "forbidden".into(),
        }
        .into();
        assert!(matches!(err, BridgeError::PostingFailed(_)));
        assert_eq!(err.status_code(), 502);
    }

    #[test]
    fn caller_errors_are_not_retryable() {
        assert!(!BridgeError::UnsupportedLabel("SPAM".into()).is_retryable());
        assert!(!BridgeError::NothingToUnsubscribe.is_retryable());
        assert!(!BridgeError::Unauthorized.is_retryable());
    }

    #[test]
    fn display_includes_detail() {
        let err = BridgeError::UnsupportedLabel("SPAM".into());
        assert_eq!(err.to_string(), "unsupported label: SPAM");
        let err = ProviderError::Api {
            status: 404,
            message: "Requested entity was not found.".into(),
        };
        assert_eq!(err.to_string(), "api error (404): Requested entity was not found.");
    }
}

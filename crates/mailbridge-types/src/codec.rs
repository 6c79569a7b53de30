//! Lenient base64 decoding for provider payloads.
//!
//! Gmail returns raw messages in the URL-safe alphabet, usually without
//! padding; Pub/Sub push bodies use the standard alphabet. Both go through
//! [`decode_base64`], which maps the URL-safe characters onto the standard
//! ones and ignores padding.
//!
//! Google APIs also serialize 64-bit ids as JSON strings in some responses
//! and numbers in others; [`u64_from_number_or_string`] accepts both.

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use serde::{Deserialize, Deserializer};

/// Decode standard or URL-safe base64, padded or not.
pub fn decode_base64(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let normalized: String = input
        .trim()
        .trim_end_matches('=')
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    STANDARD_NO_PAD.decode(normalized)
}

/// Serde helper for ids that arrive as `123` or `"123"`.
pub fn u64_from_number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

//! Mailbox labels that can drive notifications.
//!
//! Only the labels in [`Label::ALL`] may be subscribed to. Parsing is
//! case-insensitive; anything else is rejected with
//! [`BridgeError::UnsupportedLabel`] and the whole request fails.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// A subscribable mailbox label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Label {
    Inbox,
    CategoryPromotions,
    CategoryPersonal,
    CategorySocial,
    CategoryUpdates,
    CategoryForums,
}

/// An ordered, duplicate-free set of labels.
pub type LabelSet = BTreeSet<Label>;

impl Label {
    /// Every supported label, in display order.
    pub const ALL: [Label; 6] = [
        Label::Inbox,
        Label::CategoryPromotions,
        Label::CategoryPersonal,
        Label::CategorySocial,
        Label::CategoryUpdates,
        Label::CategoryForums,
    ];

    /// Provider label id.
    pub fn as_str(self) -> &'static str {
        match self {
            Label::Inbox => "INBOX",
            Label::CategoryPromotions => "CATEGORY_PROMOTIONS",
            Label::CategoryPersonal => "CATEGORY_PERSONAL",
            Label::CategorySocial => "CATEGORY_SOCIAL",
            Label::CategoryUpdates => "CATEGORY_UPDATES",
            Label::CategoryForums => "CATEGORY_FORUMS",
        }
    }

    /// The full allow-list as a set.
    pub fn all() -> LabelSet {
        Self::ALL.into_iter().collect()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Label::ALL
            .into_iter()
            .find(|l| l.as_str() == wanted)
            .ok_or_else(|| BridgeError::UnsupportedLabel(s.trim().to_string()))
    }
}

/// Parse a user-supplied label list separated by commas and/or whitespace.
///
/// Empty input yields an empty set. The first unsupported label fails the
/// whole parse.
pub fn parse_labels(input: &str) -> Result<LabelSet, BridgeError> {
    input
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(Label::from_str)
        .collect()
}

/// Render a set as `A, B, C`.
pub fn join_labels(labels: &LabelSet) -> String {
    labels
        .iter()
        .map(|l| l.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

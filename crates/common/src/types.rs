// Domain records shared across Parley crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat message as held by the message store.
///
/// Only `seen_by` is mutated by the gateway, and only by set-add.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Image URL, when the message carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Viewers in first-seen order. Never contains duplicates.
    #[serde(default)]
    pub seen_by: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MessageRecord {
    pub fn new(
        id: impl Into<String>,
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        text: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            text,
            image: None,
            seen_by: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_seen_by(&self, viewer_id: &str) -> bool {
        self.seen_by.iter().any(|seen| seen == viewer_id)
    }

    /// Adds `viewer_id` to `seen_by` unless already present.
    /// Returns true if the set grew.
    pub fn add_viewer(&mut self, viewer_id: &str) -> bool {
        if self.is_seen_by(viewer_id) {
            return false;
        }
        self.seen_by.push(viewer_id.to_owned());
        self.updated_at = Utc::now();
        true
    }
}

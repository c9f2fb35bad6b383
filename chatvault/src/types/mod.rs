pub mod error;
pub mod identity;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;

/// A contact known to the connected account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactRecord {
    /// Identity key (`localPart@domain`)
    pub id: String,

    /// Name saved by the account owner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Name the contact suggested for themselves
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<String>,

    /// Verified (business) name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_name: Option<String>,

    /// Attributes this layer does not interpret
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

impl ContactRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            notify: None,
            verified_name: None,
            extra: Map::new(),
        }
    }

    /// First non-empty of name, suggested name, verified name
    pub fn display_name(&self) -> Option<&str> {
        [&self.name, &self.notify, &self.verified_name]
            .into_iter()
            .filter_map(|field| field.as_deref())
            .find(|value| !value.trim().is_empty())
    }

    /// Last-write-wins merge of a partial update
    ///
    /// Fields present in `update` overwrite, absent ones keep their value.
    pub fn merge(&mut self, update: ContactRecord) {
        if update.name.is_some() {
            self.name = update.name;
        }
        if update.notify.is_some() {
            self.notify = update.notify;
        }
        if update.verified_name.is_some() {
            self.verified_name = update.verified_name;
        }
        self.extra.extend(update.extra);
    }
}

/// Content of a message, passed through from the protocol layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePayload {
    Text {
        body: String,
    },
    Media {
        media_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    Reaction {
        target_id: String,
        emoji: String,
    },
    System {
        event: String,
        #[serde(default)]
        detail: Map<String, Value>,
    },
}

impl Default for MessagePayload {
    fn default() -> Self {
        Self::System {
            event: "unknown".to_string(),
            detail: Map::new(),
        }
    }
}

/// A single message in the flat index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Globally unique message id
    pub id: String,
    /// Identity key of the owning conversation
    pub thread_key: String,
    /// True when sent by the connected account
    pub from_me: bool,
    /// Seconds since epoch
    pub timestamp: i64,
    #[serde(default)]
    pub payload: MessagePayload,
}

impl MessageRecord {
    pub fn text(
        id: impl Into<String>,
        thread_key: impl Into<String>,
        from_me: bool,
        timestamp: i64,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            thread_key: thread_key.into(),
            from_me,
            timestamp,
            payload: MessagePayload::Text { body: body.into() },
        }
    }
}

/// Message ids of one conversation, in arrival order
///
/// Persisted as a plain JSON array of ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatThread {
    messages: VecDeque<String>,
}

impl ChatThread {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Message ids, oldest arrival first
    pub fn message_ids(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.messages.iter().any(|existing| existing == id)
    }

    pub(crate) fn push(&mut self, id: String) {
        self.messages.push_back(id);
    }

    pub(crate) fn pop_oldest(&mut self) -> Option<String> {
        self.messages.pop_front()
    }

    pub(crate) fn remove_id(&mut self, id: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|existing| existing != id);
        self.messages.len() != before
    }

    pub(crate) fn retain<F: FnMut(&String) -> bool>(&mut self, keep: F) {
        self.messages.retain(keep);
    }
}

impl<S: Into<String>> FromIterator<S> for ChatThread {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            messages: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Sync progress counters, persisted as the `meta` record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    #[serde(default)]
    pub is_fully_synced: bool,
    #[serde(default)]
    pub sync_attempts: u32,
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
    /// Collection sizes, recomputed whenever the record is read or saved
    #[serde(default)]
    pub contacts: usize,
    #[serde(default)]
    pub chats: usize,
    #[serde(default)]
    pub messages: usize,
}

//! Protocol event ingestion
//!
//! Maps the typed event stream from the protocol client onto store
//! mutations. Events arrive on one ordered channel; a bad record is logged
//! and skipped, never allowed to stop the stream.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::store::{AppendOutcome, Store};
use crate::types::error::VaultError;
use crate::types::{ContactRecord, MessagePayload, MessageRecord};

/// Contact as delivered by the protocol client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawContact {
    pub id: Option<String>,
    pub name: Option<String>,
    pub notify: Option<String>,
    pub verified_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Chat existence notice; messages arrive separately
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawChat {
    pub id: Option<String>,
}

/// Message as delivered by the protocol client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: Option<String>,
    pub thread_key: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    pub timestamp: Option<i64>,
    pub payload: Option<MessagePayload>,
}

fn required(field: Option<String>, what: &str) -> Result<String, VaultError> {
    match field {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(VaultError::InvalidInput(format!("missing {}", what))),
    }
}

impl TryFrom<RawContact> for ContactRecord {
    type Error = VaultError;

    fn try_from(raw: RawContact) -> Result<Self, Self::Error> {
        Ok(ContactRecord {
            id: required(raw.id, "contact id")?,
            name: raw.name,
            notify: raw.notify,
            verified_name: raw.verified_name,
            extra: raw.extra,
        })
    }
}

impl TryFrom<RawMessage> for MessageRecord {
    type Error = VaultError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        let id = required(raw.id, "message id")?;
        let thread_key = required(raw.thread_key, "owning thread")
            .map_err(|e| VaultError::InvalidInput(format!("message {}: {}", id, e)))?;
        Ok(MessageRecord {
            id,
            thread_key,
            from_me: raw.from_me,
            timestamp: raw.timestamp.unwrap_or_default(),
            payload: raw.payload.unwrap_or_default(),
        })
    }
}

/// Events consumed from the protocol layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ProtocolEvent {
    /// Bulk contact load; replaces by key, never deletes others
    #[serde(rename = "contacts.set")]
    ContactsSet { contacts: Vec<RawContact> },
    #[serde(rename = "contacts.update")]
    ContactsUpdate { contacts: Vec<RawContact> },
    #[serde(rename = "chats.set")]
    ChatsSet { chats: Vec<RawChat> },
    #[serde(rename = "chats.update")]
    ChatsUpdate { chats: Vec<RawChat> },
    /// Historical batch; `is_latest` marks the final one
    #[serde(rename = "messages.history")]
    MessagesHistory {
        messages: Vec<RawMessage>,
        #[serde(default)]
        is_latest: bool,
    },
    /// Live arrivals
    #[serde(rename = "messages.upsert")]
    MessagesUpsert { messages: Vec<RawMessage> },
    #[serde(rename = "logged_out")]
    LoggedOut,
}

impl ProtocolEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ContactsSet { .. } => "contacts.set",
            Self::ContactsUpdate { .. } => "contacts.update",
            Self::ChatsSet { .. } => "chats.set",
            Self::ChatsUpdate { .. } => "chats.update",
            Self::MessagesHistory { .. } => "messages.history",
            Self::MessagesUpsert { .. } => "messages.upsert",
            Self::LoggedOut => "logged_out",
        }
    }
}

/// Counters for applied events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub events: usize,
    pub contacts: usize,
    pub threads: usize,
    pub messages_inserted: usize,
    pub messages_replaced: usize,
    pub messages_moved: usize,
    pub skipped: usize,
}

impl IngestReport {
    pub fn absorb(&mut self, other: IngestReport) {
        self.events += other.events;
        self.contacts += other.contacts;
        self.threads += other.threads;
        self.messages_inserted += other.messages_inserted;
        self.messages_replaced += other.messages_replaced;
        self.messages_moved += other.messages_moved;
        self.skipped += other.skipped;
    }
}

/// Applies protocol events to a store
#[derive(Clone)]
pub struct EventIngestor {
    store: Store,
}

impl EventIngestor {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Apply one event
    pub async fn apply(&self, event: ProtocolEvent) -> IngestReport {
        let mut report = IngestReport {
            events: 1,
            ..Default::default()
        };
        let name = event.name();

        match event {
            ProtocolEvent::ContactsSet { contacts } => {
                for raw in contacts {
                    match ContactRecord::try_from(raw) {
                        Ok(contact) => {
                            self.store.upsert_contact(contact);
                            report.contacts += 1;
                        }
                        Err(e) => self.skip(name, &e, &mut report),
                    }
                }
            }
            ProtocolEvent::ContactsUpdate { contacts } => {
                for raw in contacts {
                    match ContactRecord::try_from(raw) {
                        Ok(update) => {
                            self.store.merge_contact(update);
                            report.contacts += 1;
                        }
                        Err(e) => self.skip(name, &e, &mut report),
                    }
                }
            }
            ProtocolEvent::ChatsSet { chats } | ProtocolEvent::ChatsUpdate { chats } => {
                for raw in chats {
                    match required(raw.id, "chat id") {
                        Ok(key) => {
                            if self.store.ensure_thread(&key).is_some() {
                                report.threads += 1;
                            }
                        }
                        Err(e) => self.skip(name, &e, &mut report),
                    }
                }
            }
            ProtocolEvent::MessagesHistory {
                messages,
                is_latest,
            } => {
                self.apply_messages(name, messages, &mut report);
                self.store.record_history_batch(is_latest);
            }
            ProtocolEvent::MessagesUpsert { messages } => {
                self.apply_messages(name, messages, &mut report);
            }
            ProtocolEvent::LoggedOut => {
                info!("Account logged out, clearing store");
                self.store.clear_all();
                if let Err(e) = self.store.flush_all().await {
                    error!("Failed to persist cleared store: {}", e);
                }
            }
        }

        debug!("Applied {}: {:?}", name, report);
        report
    }

    fn apply_messages(&self, name: &str, messages: Vec<RawMessage>, report: &mut IngestReport) {
        for raw in messages {
            let message = match MessageRecord::try_from(raw) {
                Ok(message) => message,
                Err(e) => {
                    self.skip(name, &e, report);
                    continue;
                }
            };
            match self.store.append_message(message) {
                AppendOutcome::Inserted => report.messages_inserted += 1,
                AppendOutcome::Replaced => report.messages_replaced += 1,
                AppendOutcome::Moved => report.messages_moved += 1,
                AppendOutcome::Rejected => report.skipped += 1,
            }
        }
    }

    fn skip(&self, name: &str, error: &VaultError, report: &mut IngestReport) {
        warn!("Skipping record in {}: {}", name, error);
        report.skipped += 1;
    }

    /// Consume events until every sender is dropped
    pub async fn run(&self, events: flume::Receiver<ProtocolEvent>) -> IngestReport {
        info!("Event ingestion started");
        let mut total = IngestReport::default();
        while let Ok(event) = events.recv_async().await {
            total.absorb(self.apply(event).await);
        }
        info!(
            "Event ingestion finished: {} event(s), {} record(s) skipped",
            total.events, total.skipped
        );
        total
    }
}

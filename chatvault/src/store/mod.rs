//! In-memory store for contacts, threads and messages
//!
//! The store owns three collections that must stay consistent with each other:
//! - `contacts`: identity key → contact record
//! - `chats`: identity key → thread (message ids in arrival order)
//! - `messages`: message id → message record (the flat index)
//!
//! Every thread reference has an index entry owned by that thread and vice
//! versa. Mutations go through [`Store`] methods, apply to memory immediately,
//! and signal the flush schedulers; persistence follows after the debounce
//! window (write-behind). Reads never wait on a pending flush.

pub mod metadata;
pub mod retention;

use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::persistence::bootstrap::{self, LoadReport};
use crate::persistence::scheduler::FlushScheduler;
use crate::persistence::writer::DurableWriter;
use crate::persistence::{Collection, DurableSink, SnapshotSource};
use crate::types::error::{Result, VaultError};
use crate::types::identity::{self, KeyKind};
use crate::types::{ChatThread, ContactRecord, MessageRecord, SyncMetadata};

/// The three related collections
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collections {
    pub(crate) contacts: HashMap<String, ContactRecord>,
    pub(crate) chats: HashMap<String, ChatThread>,
    pub(crate) messages: HashMap<String, MessageRecord>,
}

impl Collections {
    pub fn new(
        contacts: HashMap<String, ContactRecord>,
        chats: HashMap<String, ChatThread>,
        messages: HashMap<String, MessageRecord>,
    ) -> Self {
        Self {
            contacts,
            chats,
            messages,
        }
    }

    pub fn contacts(&self) -> &HashMap<String, ContactRecord> {
        &self.contacts
    }

    pub fn chats(&self) -> &HashMap<String, ChatThread> {
        &self.chats
    }

    pub fn messages(&self) -> &HashMap<String, MessageRecord> {
        &self.messages
    }

    /// Reference `id` from its owning thread once, enforcing the cap on both
    /// structures
    fn attach_to_thread(&mut self, key: &str, id: String, cap: usize) -> Vec<String> {
        let thread = self.chats.entry(key.to_owned()).or_default();
        if thread.contains(&id) {
            return Vec::new();
        }
        thread.push(id);
        self.trim_thread(key, cap)
    }

    /// Drop the oldest references until the thread fits, together with
    /// their index entries
    pub(crate) fn trim_thread(&mut self, key: &str, max_length: usize) -> Vec<String> {
        let Some(thread) = self.chats.get_mut(key) else {
            return Vec::new();
        };

        let mut removed = Vec::new();
        while thread.len() > max_length {
            let Some(oldest) = thread.pop_oldest() else {
                break;
            };
            // Only the owning thread may delete the index entry
            if self
                .messages
                .get(&oldest)
                .is_some_and(|m| m.thread_key == key)
            {
                self.messages.remove(&oldest);
            }
            removed.push(oldest);
        }
        removed
    }

    fn clear(&mut self) {
        self.contacts.clear();
        self.chats.clear();
        self.messages.clear();
    }
}

/// Shared state read by the flush schedulers at snapshot time
pub(crate) struct StoreState {
    collections: RwLock<Collections>,
    metadata: RwLock<SyncMetadata>,
}

impl StoreState {
    fn read_collections(&self) -> RwLockReadGuard<'_, Collections> {
        self.collections.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_collections(&self) -> RwLockWriteGuard<'_, Collections> {
        self.collections.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_metadata(&self) -> RwLockReadGuard<'_, SyncMetadata> {
        self.metadata.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_metadata(&self) -> RwLockWriteGuard<'_, SyncMetadata> {
        self.metadata.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Serialize a map as an ordered list of `[key, value]` pairs
fn pairs_json<V: Serialize>(map: &HashMap<String, V>) -> Result<Vec<u8>> {
    let pairs: Vec<(&String, &V)> = map.iter().collect();
    Ok(serde_json::to_vec(&pairs)?)
}

impl SnapshotSource for StoreState {
    fn snapshot(&self, collection: Collection) -> Result<Vec<u8>> {
        let collections = self.read_collections();
        match collection {
            Collection::Contacts => pairs_json(&collections.contacts),
            Collection::Chats => pairs_json(&collections.chats),
            Collection::Messages => pairs_json(&collections.messages),
            Collection::Meta => {
                let record = metadata::with_counts(&self.read_metadata(), &collections);
                Ok(serde_json::to_vec(&record)?)
            }
        }
    }
}

/// Store tuning taken from configuration
#[derive(Debug, Clone, Copy)]
pub struct StoreSettings {
    pub debounce: Duration,
    pub thread_cap: usize,
}

impl StoreSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            debounce: config.storage.debounce(),
            thread_cap: config.retention.thread_cap,
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Result of [`Store::append_message`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// New id, appended to its thread
    Inserted,
    /// Known id, index entry overwritten, thread untouched
    Replaced,
    /// Known id now owned by a different thread; the reference moved
    Moved,
    /// Missing id or owning thread; nothing changed
    Rejected,
}

/// Presentation-side contact filter
#[derive(Debug, Clone, Default)]
pub struct ContactFilter {
    /// Case-insensitive substring of the display name or identity key
    pub query: Option<String>,
    pub kind: Option<KeyKind>,
}

impl ContactFilter {
    fn matches(&self, contact: &ContactRecord) -> bool {
        if let Some(kind) = self.kind {
            if identity::kind(&contact.id) != kind {
                return false;
            }
        }

        match &self.query {
            None => true,
            Some(query) => {
                let query = query.to_lowercase();
                contact.id.to_lowercase().contains(&query)
                    || contact
                        .display_name()
                        .is_some_and(|name| name.to_lowercase().contains(&query))
            }
        }
    }
}

/// Handle to the store, cheap to clone
#[derive(Clone)]
pub struct Store {
    state: Arc<StoreState>,
    data_flusher: FlushScheduler,
    meta_flusher: FlushScheduler,
    thread_cap: usize,
}

impl Store {
    /// Build a store over already-loaded state
    ///
    /// Must be called within a Tokio runtime; the flush workers are spawned here.
    pub fn open(
        collections: Collections,
        metadata: SyncMetadata,
        sink: Arc<dyn DurableSink>,
        settings: StoreSettings,
    ) -> Result<Self> {
        if settings.thread_cap == 0 {
            return Err(VaultError::Config("thread cap must be positive".into()));
        }

        let state = Arc::new(StoreState {
            collections: RwLock::new(collections),
            metadata: RwLock::new(metadata),
        });

        let flush_lock = Arc::new(tokio::sync::Mutex::new(()));
        let data_flusher = FlushScheduler::start(
            "data",
            settings.debounce,
            state.clone(),
            sink.clone(),
            flush_lock.clone(),
        )?;
        let meta_flusher =
            FlushScheduler::start("meta", settings.debounce, state.clone(), sink, flush_lock)?;

        Ok(Self {
            state,
            data_flusher,
            meta_flusher,
            thread_cap: settings.thread_cap,
        })
    }

    /// Load the data directory and open a store that persists back into it
    pub fn bootstrap(
        data_dir: &Path,
        settings: StoreSettings,
    ) -> Result<(Self, Arc<DurableWriter>, LoadReport)> {
        let (collections, metadata, report) = bootstrap::load_all(data_dir);
        let writer = Arc::new(DurableWriter::new(data_dir));
        let store = Self::open(collections, metadata, writer.clone(), settings)?;
        Ok((store, writer, report))
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Collections> {
        self.state.read_collections()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Collections> {
        self.state.write_collections()
    }

    pub(crate) fn signal_data(&self, collections: &[Collection]) {
        for collection in collections {
            self.data_flusher.signal(*collection);
        }
    }

    pub(crate) fn signal_meta(&self) {
        self.meta_flusher.signal(Collection::Meta);
    }

    fn flusher_for(&self, collection: Collection) -> &FlushScheduler {
        match collection {
            Collection::Meta => &self.meta_flusher,
            _ => &self.data_flusher,
        }
    }

    pub fn thread_cap(&self) -> usize {
        self.thread_cap
    }

    // ========== Mutations ==========

    /// Insert or replace a contact by identity key
    pub fn upsert_contact(&self, contact: ContactRecord) -> bool {
        if contact.id.trim().is_empty() {
            warn!("Skipping contact without identity key");
            return false;
        }

        self.write().contacts.insert(contact.id.clone(), contact);
        self.signal_data(&[Collection::Contacts]);
        true
    }

    /// Merge a partial contact update, inserting unknown contacts
    pub fn merge_contact(&self, update: ContactRecord) -> bool {
        if update.id.trim().is_empty() {
            warn!("Skipping contact update without identity key");
            return false;
        }

        {
            let mut collections = self.write();
            match collections.contacts.get_mut(&update.id) {
                Some(existing) => existing.merge(update),
                None => {
                    collections.contacts.insert(update.id.clone(), update);
                }
            }
        }
        self.signal_data(&[Collection::Contacts]);
        true
    }

    /// Create an empty thread if absent and return the thread
    ///
    /// Signals only when the thread was created. Returns `None` for an empty key.
    pub fn ensure_thread(&self, thread_key: &str) -> Option<ChatThread> {
        if thread_key.trim().is_empty() {
            warn!("Skipping thread without identity key");
            return None;
        }

        let (thread, created) = {
            let mut collections = self.write();
            match collections.chats.get(thread_key) {
                Some(thread) => (thread.clone(), false),
                None => {
                    collections
                        .chats
                        .insert(thread_key.to_owned(), ChatThread::new());
                    (ChatThread::new(), true)
                }
            }
        };

        if created {
            debug!("Created thread {}", thread_key);
            self.signal_data(&[Collection::Chats]);
        }
        Some(thread)
    }

    /// Index a message and append it to its owning thread
    ///
    /// Re-inserting a known id overwrites the index entry without adding a
    /// second reference. Threads are capped at `thread_cap`; the oldest
    /// references are dropped together with their index entries.
    pub fn append_message(&self, message: MessageRecord) -> AppendOutcome {
        if message.id.trim().is_empty() {
            warn!(
                "Skipping message without id (thread: {:?})",
                message.thread_key
            );
            return AppendOutcome::Rejected;
        }
        if message.thread_key.trim().is_empty() {
            warn!("Skipping message {} without owning thread", message.id);
            return AppendOutcome::Rejected;
        }

        let (outcome, evicted) = {
            let mut collections = self.write();
            let id = message.id.clone();
            let key = message.thread_key.clone();

            match collections.messages.insert(id.clone(), message) {
                None => {
                    let evicted = collections.attach_to_thread(&key, id, self.thread_cap);
                    (AppendOutcome::Inserted, evicted)
                }
                Some(previous) if previous.thread_key == key => {
                    // The reference can be missing after a partial load
                    let evicted = collections.attach_to_thread(&key, id, self.thread_cap);
                    (AppendOutcome::Replaced, evicted)
                }
                Some(previous) => {
                    if let Some(old_thread) = collections.chats.get_mut(&previous.thread_key) {
                        old_thread.remove_id(&id);
                    }
                    let evicted = collections.attach_to_thread(&key, id, self.thread_cap);
                    (AppendOutcome::Moved, evicted)
                }
            }
        };

        if !evicted.is_empty() {
            debug!(
                "Thread cap {} reached, evicted {} message(s)",
                self.thread_cap,
                evicted.len()
            );
        }

        self.signal_data(&[Collection::Messages, Collection::Chats]);
        outcome
    }

    /// Remove a message from the flat index only
    ///
    /// Thread references are left alone; trim the thread first.
    pub fn remove_message(&self, id: &str) -> Option<MessageRecord> {
        let removed = self.write().messages.remove(id);
        if removed.is_some() {
            self.signal_data(&[Collection::Messages]);
        }
        removed
    }

    /// Empty every collection and reset metadata (logout)
    ///
    /// Nothing is persisted here; callers flush afterwards.
    pub fn clear_all(&self) {
        self.write().clear();
        *self.state.write_metadata() = SyncMetadata::default();
        info!("Store cleared");
    }

    // ========== Queries ==========

    pub fn get_contact(&self, id: &str) -> Option<ContactRecord> {
        self.read().contacts.get(id).cloned()
    }

    /// Contacts matching a filter, ordered by display name then key
    ///
    /// Contacts without a display name sort by the local part of their key.
    pub fn contacts(&self, filter: &ContactFilter) -> Vec<ContactRecord> {
        let mut contacts: Vec<ContactRecord> = self
            .read()
            .contacts
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();

        contacts.sort_by_cached_key(|c| {
            (
                c.display_name()
                    .unwrap_or_else(|| identity::local_part(&c.id))
                    .to_lowercase(),
                c.id.clone(),
            )
        });
        contacts
    }

    pub fn get_thread(&self, thread_key: &str) -> Option<ChatThread> {
        self.read().chats.get(thread_key).cloned()
    }

    pub fn thread_keys(&self) -> Vec<String> {
        self.read().chats.keys().cloned().collect()
    }

    /// Messages of a thread in arrival order
    pub fn thread_messages(&self, thread_key: &str) -> Vec<MessageRecord> {
        let collections = self.read();
        let Some(thread) = collections.chats.get(thread_key) else {
            return Vec::new();
        };
        thread
            .message_ids()
            .filter_map(|id| collections.messages.get(id))
            .cloned()
            .collect()
    }

    pub fn get_message(&self, id: &str) -> Option<MessageRecord> {
        self.read().messages.get(id).cloned()
    }

    pub fn contains_message(&self, id: &str) -> bool {
        self.read().messages.contains_key(id)
    }

    pub fn message_ids(&self) -> Vec<String> {
        self.read().messages.keys().cloned().collect()
    }

    /// Copy of all three collections
    pub fn snapshot_collections(&self) -> Collections {
        self.read().clone()
    }

    /// Serialized content of a record as it would be flushed now
    pub fn serialize(&self, collection: Collection) -> Result<Vec<u8>> {
        self.state.snapshot(collection)
    }

    // ========== Flushing ==========

    /// Write all four records immediately, attempting every one
    pub async fn flush_all(&self) -> Result<()> {
        let mut failures = Vec::new();
        for collection in Collection::ALL {
            if let Err(e) = self.flusher_for(collection).flush_snapshot_now(collection).await {
                failures.push(e.to_string());
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(VaultError::Persistence(failures.join("; ")))
        }
    }

    /// Records signalled but not yet written
    pub fn pending_flushes(&self) -> Vec<Collection> {
        let mut pending = self.data_flusher.pending();
        pending.extend(self.meta_flusher.pending());
        pending
    }

    /// Completed scheduled cycles of the data group
    pub fn subscribe_data_flushes(&self) -> tokio::sync::watch::Receiver<u64> {
        self.data_flusher.subscribe_cycles()
    }

    /// Stop both flush workers; pending records stay dirty
    pub async fn stop_flushing(&self) {
        self.data_flusher.stop().await;
        self.meta_flusher.stop().await;
    }
}

//! Sync metadata kept alongside the collections

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{Collections, Store};
use crate::types::SyncMetadata;

/// Metadata with collection sizes taken from `collections`
pub(crate) fn with_counts(metadata: &SyncMetadata, collections: &Collections) -> SyncMetadata {
    SyncMetadata {
        contacts: collections.contacts.len(),
        chats: collections.chats.len(),
        messages: collections.messages.len(),
        ..metadata.clone()
    }
}

impl Store {
    /// Current metadata with live collection sizes
    pub fn metadata(&self) -> SyncMetadata {
        let collections = self.read();
        with_counts(&self.state.read_metadata(), &collections)
    }

    /// Count a sync attempt and stamp its time
    pub fn record_sync_attempt(&self) -> u32 {
        self.record_sync_attempt_at(Utc::now())
    }

    pub fn record_sync_attempt_at(&self, at: DateTime<Utc>) -> u32 {
        let attempts = {
            let mut metadata = self.state.write_metadata();
            metadata.sync_attempts = metadata.sync_attempts.saturating_add(1);
            metadata.last_sync = Some(at);
            metadata.sync_attempts
        };
        debug!("Sync attempt {} recorded", attempts);
        self.signal_meta();
        attempts
    }

    pub fn mark_fully_synced(&self) {
        let changed = {
            let mut metadata = self.state.write_metadata();
            !std::mem::replace(&mut metadata.is_fully_synced, true)
        };
        if changed {
            info!("History sync complete");
            self.signal_meta();
        }
    }

    /// Bookkeeping for one history batch
    pub fn record_history_batch(&self, is_latest: bool) {
        self.record_sync_attempt();
        if is_latest {
            self.mark_fully_synced();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::persistence::Collection;
    use crate::store::tests::{message, open_store};
    use crate::types::SyncMetadata;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_metadata_counts_are_live() {
        let (store, _) = open_store(200);
        store.append_message(message("m1", "a@s.whatsapp.net", 1));
        store.append_message(message("m2", "b@s.whatsapp.net", 2));

        let metadata = store.metadata();
        assert_eq!(metadata.messages, 2);
        assert_eq!(metadata.chats, 2);
        assert_eq!(metadata.contacts, 0);
    }

    #[tokio::test]
    async fn test_history_batches_update_sync_state() {
        let (store, _) = open_store(200);
        let at = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        assert_eq!(store.record_sync_attempt_at(at), 1);
        assert_eq!(store.pending_flushes(), vec![Collection::Meta]);

        store.record_history_batch(false);
        assert!(!store.metadata().is_fully_synced);
        store.record_history_batch(true);

        let metadata = store.metadata();
        assert!(metadata.is_fully_synced);
        assert_eq!(metadata.sync_attempts, 3);
        assert!(metadata.last_sync.unwrap() > at);
    }

    #[tokio::test]
    async fn test_meta_snapshot_carries_counts() {
        let (store, _) = open_store(200);
        store.append_message(message("m1", "a@s.whatsapp.net", 1));

        let bytes = store.serialize(Collection::Meta).unwrap();
        let decoded: SyncMetadata = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.messages, 1);
        assert_eq!(decoded.sync_attempts, 0);
    }
}

//! Startup loading of the four records
//!
//! Each record loads independently. A missing file yields an empty
//! collection; an unreadable or malformed one is logged and also yields an
//! empty collection, without affecting the others.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{info, warn};

use super::Collection;
use crate::store::Collections;
use crate::types::{ChatThread, ContactRecord, MessageRecord, SyncMetadata};

/// How one record was loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RecordOutcome {
    /// Parsed; holds the entry count
    Loaded(usize),
    Missing,
    /// Unreadable or malformed; holds the reason
    Corrupt(String),
}

/// Per-record outcomes of [`load_all`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub records: Vec<(Collection, RecordOutcome)>,
    /// Leftover temp files removed before loading
    pub stale_temp_files: usize,
}

impl LoadReport {
    pub fn outcome(&self, collection: Collection) -> Option<&RecordOutcome> {
        self.records
            .iter()
            .find(|(c, _)| *c == collection)
            .map(|(_, outcome)| outcome)
    }

    pub fn has_corruption(&self) -> bool {
        self.records
            .iter()
            .any(|(_, outcome)| matches!(outcome, RecordOutcome::Corrupt(_)))
    }
}

/// Remove `*.tmp` files left by an interrupted write
fn remove_stale_temp_files(data_dir: &Path) -> usize {
    let entries = match fs::read_dir(data_dir) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "tmp") {
            match fs::remove_file(&path) {
                Ok(()) => {
                    info!("Removed stale temp file {:?}", path);
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove stale temp file {:?}: {}", path, e),
            }
        }
    }
    removed
}

/// Read and parse one record, `None` when the file does not exist
fn read_record<T: DeserializeOwned>(
    data_dir: &Path,
    collection: Collection,
) -> Result<Option<T>, String> {
    let path = data_dir.join(collection.file_name());
    let content = match fs::read(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(format!("failed to read {:?}: {}", path, e)),
    };

    serde_json::from_slice(&content)
        .map(Some)
        .map_err(|e| format!("failed to parse {:?}: {}", path, e))
}

/// Load a `[key, value]` pair list into a map
fn load_pairs<V: DeserializeOwned>(
    data_dir: &Path,
    collection: Collection,
    report: &mut LoadReport,
) -> HashMap<String, V> {
    let outcome = read_record::<Vec<(String, V)>>(data_dir, collection);
    let (map, outcome) = match outcome {
        Ok(Some(pairs)) => {
            let map: HashMap<String, V> = pairs.into_iter().collect();
            let count = map.len();
            (map, RecordOutcome::Loaded(count))
        }
        Ok(None) => (HashMap::new(), RecordOutcome::Missing),
        Err(reason) => {
            warn!("Discarding {} record: {}", collection, reason);
            (HashMap::new(), RecordOutcome::Corrupt(reason))
        }
    };
    report.records.push((collection, outcome));
    map
}

/// Load all four records from `data_dir`
///
/// Never fails: damaged records degrade to empty ones, as reported in the
/// returned [`LoadReport`].
pub fn load_all(data_dir: &Path) -> (Collections, SyncMetadata, LoadReport) {
    let mut report = LoadReport {
        stale_temp_files: remove_stale_temp_files(data_dir),
        ..Default::default()
    };

    let contacts: HashMap<String, ContactRecord> =
        load_pairs(data_dir, Collection::Contacts, &mut report);
    let chats: HashMap<String, ChatThread> = load_pairs(data_dir, Collection::Chats, &mut report);
    let messages: HashMap<String, MessageRecord> =
        load_pairs(data_dir, Collection::Messages, &mut report);

    let metadata = match read_record::<SyncMetadata>(data_dir, Collection::Meta) {
        Ok(Some(metadata)) => {
            report
                .records
                .push((Collection::Meta, RecordOutcome::Loaded(1)));
            metadata
        }
        Ok(None) => {
            report.records.push((Collection::Meta, RecordOutcome::Missing));
            SyncMetadata::default()
        }
        Err(reason) => {
            warn!("Discarding meta record: {}", reason);
            report
                .records
                .push((Collection::Meta, RecordOutcome::Corrupt(reason)));
            SyncMetadata::default()
        }
    };

    info!(
        "Loaded {} contacts, {} chats, {} messages from {:?}",
        contacts.len(),
        chats.len(),
        messages.len(),
        data_dir
    );

    (Collections::new(contacts, chats, messages), metadata, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::writer::DurableWriter;
    use crate::persistence::DurableSink;
    use crate::types::MessageRecord;

    fn write(dir: &Path, collection: Collection, content: &str) {
        fs::write(dir.join(collection.file_name()), content).unwrap();
    }

    #[test]
    fn test_empty_directory_loads_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let (collections, metadata, report) = load_all(dir.path());

        assert_eq!(collections, Collections::default());
        assert_eq!(metadata, SyncMetadata::default());
        assert!(report
            .records
            .iter()
            .all(|(_, outcome)| *outcome == RecordOutcome::Missing));
    }

    #[test]
    fn test_missing_directory_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (collections, _, report) = load_all(&dir.path().join("absent"));
        assert!(collections.messages().is_empty());
        assert!(!report.has_corruption());
    }

    #[test]
    fn test_corruption_is_scoped_to_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let message = MessageRecord::text("m1", "a@s.whatsapp.net", true, 10, "hi");

        write(dir.path(), Collection::Contacts, "{ not json");
        write(dir.path(), Collection::Chats, r#"[["a@s.whatsapp.net",["m1"]]]"#);
        write(
            dir.path(),
            Collection::Messages,
            &serde_json::to_string(&vec![("m1", &message)]).unwrap(),
        );
        write(dir.path(), Collection::Meta, r#"{"is_fully_synced":true,"sync_attempts":4}"#);

        let (collections, metadata, report) = load_all(dir.path());

        assert!(matches!(
            report.outcome(Collection::Contacts),
            Some(RecordOutcome::Corrupt(_))
        ));
        assert!(collections.contacts().is_empty());
        assert_eq!(report.outcome(Collection::Chats), Some(&RecordOutcome::Loaded(1)));
        assert_eq!(collections.messages().get("m1"), Some(&message));
        assert!(metadata.is_fully_synced);
        assert_eq!(metadata.sync_attempts, 4);
    }

    #[test]
    fn test_wrong_shape_counts_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), Collection::Chats, r#"{"a@s.whatsapp.net":["m1"]}"#);

        let (collections, _, report) = load_all(dir.path());
        assert!(collections.chats().is_empty());
        assert!(report.has_corruption());
    }

    #[test]
    fn test_stale_temp_files_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), Collection::Chats, "[]");
        fs::write(dir.path().join("chats.json.tmp"), "[[\"partial").unwrap();

        let (_, _, report) = load_all(dir.path());
        assert_eq!(report.stale_temp_files, 1);
        assert_eq!(report.outcome(Collection::Chats), Some(&RecordOutcome::Loaded(0)));
        assert!(!dir.path().join("chats.json.tmp").exists());
    }

    #[test]
    fn test_loads_what_the_writer_wrote() {
        let dir = tempfile::tempdir().unwrap();
        let writer = DurableWriter::new(dir.path());

        let mut contact = ContactRecord::new("1555@s.whatsapp.net");
        contact.name = Some("Alice".to_string());
        let contacts = vec![(contact.id.clone(), contact.clone())];
        writer
            .write(Collection::Contacts, &serde_json::to_vec(&contacts).unwrap())
            .unwrap();

        let (collections, _, _) = load_all(dir.path());
        assert_eq!(collections.contacts().get("1555@s.whatsapp.net"), Some(&contact));
    }
}

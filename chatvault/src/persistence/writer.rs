//! Crash-safe single-file writes
//!
//! Each record is written to a `*.tmp` sibling, fsynced, then renamed over
//! the target. A crash before the rename leaves the previous file intact, so
//! readers only ever see a complete document.

use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::{Collection, DurableSink};
use crate::types::error::{Result, VaultError};

/// Per-record write counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    pub writes: [u64; 4],
    pub failures: [u64; 4],
}

impl WriterStats {
    pub fn writes(&self, collection: Collection) -> u64 {
        self.writes[collection.index()]
    }

    pub fn failures(&self, collection: Collection) -> u64 {
        self.failures[collection.index()]
    }
}

/// Writes records atomically into one directory
pub struct DurableWriter {
    root: PathBuf,
    writes: [AtomicU64; 4],
    failures: [AtomicU64; 4],
}

impl DurableWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writes: Default::default(),
            failures: Default::default(),
        }
    }

    /// Final location of a record
    pub fn target_path(&self, collection: Collection) -> PathBuf {
        self.root.join(collection.file_name())
    }

    /// Transient sibling used while writing
    pub fn temp_path(&self, collection: Collection) -> PathBuf {
        self.root.join(format!("{}.tmp", collection.file_name()))
    }

    /// Write `bytes` to the temp sibling and fsync it; the target is untouched
    pub fn stage(&self, collection: Collection, bytes: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(&self.root).map_err(|e| {
            VaultError::Persistence(format!(
                "{}: failed to create directory {:?}: {}",
                collection, self.root, e
            ))
        })?;

        let temp = self.temp_path(collection);
        let write = || -> std::io::Result<()> {
            let mut file = File::create(&temp)?;
            file.write_all(bytes)?;
            file.sync_all()
        };
        write().map_err(|e| {
            VaultError::Persistence(format!(
                "{}: failed to write temp file {:?}: {}",
                collection, temp, e
            ))
        })?;

        Ok(temp)
    }

    /// Rename a staged file over the target
    pub fn commit(&self, collection: Collection, staged: &Path) -> Result<()> {
        let target = self.target_path(collection);
        fs::rename(staged, &target).map_err(|e| {
            VaultError::Persistence(format!(
                "{}: failed to rename {:?} to {:?}: {}",
                collection, staged, target, e
            ))
        })?;

        // Persist the rename itself
        #[cfg(unix)]
        {
            if let Err(e) = File::open(&self.root).and_then(|dir| dir.sync_all()) {
                debug!("Directory fsync failed for {:?}: {}", self.root, e);
            }
        }

        Ok(())
    }

    pub fn stats(&self) -> WriterStats {
        let mut stats = WriterStats::default();
        for c in Collection::ALL {
            stats.writes[c.index()] = self.writes[c.index()].load(Ordering::Relaxed);
            stats.failures[c.index()] = self.failures[c.index()].load(Ordering::Relaxed);
        }
        stats
    }
}

impl DurableSink for DurableWriter {
    fn write(&self, collection: Collection, bytes: &[u8]) -> Result<()> {
        let result = self
            .stage(collection, bytes)
            .and_then(|staged| self.commit(collection, &staged));

        match &result {
            Ok(()) => {
                self.writes[collection.index()].fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Wrote {} ({} bytes) to {:?}",
                    collection,
                    bytes.len(),
                    self.target_path(collection)
                );
            }
            Err(e) => {
                self.failures[collection.index()].fetch_add(1, Ordering::Relaxed);
                warn!("Durable write failed: {}", e);
                let _ = fs::remove_file(self.temp_path(collection));
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_creates_target_without_leftover_temp() {
        let dir = tempfile::tempdir().unwrap();
        let writer = DurableWriter::new(dir.path().join("data"));

        writer.write(Collection::Contacts, b"[]").unwrap();

        let target = writer.target_path(Collection::Contacts);
        assert_eq!(fs::read(&target).unwrap(), b"[]");
        assert!(!writer.temp_path(Collection::Contacts).exists());
        assert_eq!(writer.stats().writes(Collection::Contacts), 1);
    }

    #[test]
    fn test_overwrite_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let writer = DurableWriter::new(dir.path());

        writer.write(Collection::Chats, b"[[\"a\",[]]]").unwrap();
        writer.write(Collection::Chats, b"[]").unwrap();

        assert_eq!(fs::read(writer.target_path(Collection::Chats)).unwrap(), b"[]");
        assert_eq!(writer.stats().writes(Collection::Chats), 2);
    }

    #[test]
    fn test_interrupted_write_leaves_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let writer = DurableWriter::new(dir.path());
        writer.write(Collection::Messages, b"[\"old\"]").unwrap();

        // Crash between temp write and rename
        let staged = writer.stage(Collection::Messages, b"[\"new\", \"trunc").unwrap();
        assert!(staged.exists());

        let on_disk = fs::read(writer.target_path(Collection::Messages)).unwrap();
        let parsed: Vec<String> = serde_json::from_slice(&on_disk).unwrap();
        assert_eq!(parsed, vec!["old"]);

        writer.commit(Collection::Messages, &staged).unwrap();
        assert!(!staged.exists());
    }

    #[test]
    fn test_failure_is_reported_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"file").unwrap();
        let writer = DurableWriter::new(&blocker);

        let result = writer.write(Collection::Meta, b"{}");
        assert!(matches!(result, Err(VaultError::Persistence(_))));
        assert_eq!(writer.stats().failures(Collection::Meta), 1);
        assert_eq!(writer.stats().writes(Collection::Meta), 0);
    }
}

//! Point-in-time copies of the four records
//!
//! Each backup is a directory named after its UTC creation time under the
//! configured backup root, holding the same files as the data directory.

use chrono::{DateTime, Utc};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::writer::DurableWriter;
use super::{Collection, DurableSink};
use crate::config::StorageConfig;
use crate::store::Store;
use crate::types::error::{Result, VaultError};

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Backup directories under `root`, oldest first
pub fn list_backups(root: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut backups: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.join(Collection::Meta.file_name()).is_file())
        .collect();
    backups.sort_by_cached_key(|path| backup_order(path));
    Ok(backups)
}

/// Sort key: timestamp, then the numeric collision suffix
fn backup_order(path: &Path) -> (String, u32) {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.split_once('-') {
        Some((stamp, suffix)) => (stamp.to_string(), suffix.parse().unwrap_or(0)),
        None => (name, 0),
    }
}

/// Next directory for `now`, numbered past any backup from the same second
fn unused_backup_dir(root: &Path, now: DateTime<Utc>) -> PathBuf {
    let stamp = now.format(TIMESTAMP_FORMAT).to_string();

    let next_suffix = fs::read_dir(root)
        .into_iter()
        .flatten()
        .flatten()
        .map(|entry| backup_order(&entry.path()))
        .filter(|(entry_stamp, _)| *entry_stamp == stamp)
        .map(|(_, suffix)| suffix + 1)
        .max();

    match next_suffix {
        None => root.join(stamp),
        Some(suffix) => root.join(format!("{}-{}", stamp, suffix)),
    }
}

/// Delete the oldest backups beyond `keep`; zero keeps everything
fn prune_backups(root: &Path, keep: usize) -> Result<usize> {
    if keep == 0 {
        return Ok(0);
    }

    let backups = list_backups(root)?;
    let excess = backups.len().saturating_sub(keep);
    for path in &backups[..excess] {
        if let Err(e) = fs::remove_dir_all(path) {
            warn!("Failed to prune backup {:?}: {}", path, e);
        } else {
            info!("Pruned backup {:?}", path);
        }
    }
    Ok(excess)
}

/// Snapshot the store into a new backup directory
pub async fn export_backup(store: &Store, storage: &StorageConfig) -> Result<PathBuf> {
    export_backup_at(store, storage, Utc::now()).await
}

pub async fn export_backup_at(
    store: &Store,
    storage: &StorageConfig,
    now: DateTime<Utc>,
) -> Result<PathBuf> {
    let root = storage.backup_root();
    let keep = storage.max_backups;

    let mut snapshots = Vec::with_capacity(Collection::ALL.len());
    for collection in Collection::ALL {
        snapshots.push((collection, store.serialize(collection)?));
    }

    tokio::task::spawn_blocking(move || -> Result<PathBuf> {
        let dir = unused_backup_dir(&root, now);
        let writer = DurableWriter::new(&dir);
        for (collection, bytes) in &snapshots {
            writer.write(*collection, bytes)?;
        }
        info!("Backup written to {:?}", dir);

        prune_backups(&root, keep)?;
        Ok(dir)
    })
    .await
    .map_err(|e| VaultError::Persistence(format!("backup task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::persistence::bootstrap::load_all;
    use crate::store::tests::{message, open_store};
    use chrono::TimeZone;

    fn storage(dir: &Path, max_backups: usize) -> StorageConfig {
        let mut config = AppConfig::with_data_dir(dir);
        config.storage.max_backups = max_backups;
        config.storage
    }

    #[tokio::test]
    async fn test_backup_can_be_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = open_store(200);
        store.append_message(message("m1", "a@s.whatsapp.net", 1));

        let path = export_backup(&store, &storage(dir.path(), 5)).await.unwrap();
        assert!(path.starts_with(dir.path().join("backups")));

        let (collections, metadata, report) = load_all(&path);
        assert!(!report.has_corruption());
        assert!(collections.messages().contains_key("m1"));
        assert_eq!(metadata.messages, 1);
    }

    #[tokio::test]
    async fn test_same_second_backups_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = open_store(200);
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let config = storage(dir.path(), 0);

        let first = export_backup_at(&store, &config, now).await.unwrap();
        let second = export_backup_at(&store, &config, now).await.unwrap();

        assert_eq!(first.file_name().unwrap(), "20240501T120000Z");
        assert_eq!(second.file_name().unwrap(), "20240501T120000Z-1");
    }

    #[tokio::test]
    async fn test_old_backups_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = open_store(200);
        let config = storage(dir.path(), 2);

        for hour in 1..=4 {
            let now = Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap();
            export_backup_at(&store, &config, now).await.unwrap();
        }

        let names: Vec<String> = list_backups(&config.backup_root())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["20240501T030000Z", "20240501T040000Z"]);
    }

    #[tokio::test]
    async fn test_many_same_second_backups_prune_in_creation_order() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = open_store(200);
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let config = storage(dir.path(), 3);

        for _ in 0..12 {
            export_backup_at(&store, &config, now).await.unwrap();
        }

        let names: Vec<String> = list_backups(&config.backup_root())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["20240501T120000Z-9", "20240501T120000Z-10", "20240501T120000Z-11"]
        );
    }

    #[test]
    fn test_list_backups_without_root() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_backups(&dir.path().join("none")).unwrap().is_empty());
    }
}

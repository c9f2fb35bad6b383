//! Vault lifecycle
//!
//! Opening bootstraps the store from disk, reconciles what was loaded and
//! starts the maintenance loop.
//! Shutdown stops every background task before the final blocking flush so
//! nothing writes after it.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::persistence::backup;
use crate::persistence::bootstrap::LoadReport;
use crate::persistence::writer::{DurableWriter, WriterStats};
use crate::store::{Store, StoreSettings};
use crate::sync::{EventIngestor, MaintenanceTask};
use crate::types::error::Result;

/// Outcome of [`Vault::shutdown`]
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    pub writer: WriterStats,
    /// Failure of the final flush, if any
    pub flush_error: Option<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.flush_error.is_none()
    }
}

/// Open store plus its background tasks
pub struct Vault {
    config: AppConfig,
    store: Store,
    writer: Arc<DurableWriter>,
    maintenance: MaintenanceTask,
    load_report: LoadReport,
}

impl Vault {
    /// Load the data directory and start background tasks
    ///
    /// Must be called within a Tokio runtime.
    pub fn open(config: AppConfig) -> Result<Self> {
        config.validate()?;

        info!("Opening vault at {:?}", config.storage.data_dir);
        std::fs::create_dir_all(&config.storage.data_dir)?;

        let settings = StoreSettings::from_config(&config);
        let (store, writer, load_report) = Store::bootstrap(&config.storage.data_dir, settings)?;

        // Records are written one after another, so a crash or a corrupt file
        // can leave threads and the index out of step
        let repaired = store.repair();
        if repaired.changed() {
            info!(
                "Reconciled loaded state (corrupt records: {}): {:?}",
                load_report.has_corruption(),
                repaired
            );
        }

        let maintenance = MaintenanceTask::start(
            store.clone(),
            config.retention.interval(),
            config.retention.sweep_length,
        );

        Ok(Self {
            config,
            store,
            writer,
            maintenance,
            load_report,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn ingestor(&self) -> EventIngestor {
        EventIngestor::new(self.store.clone())
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.load_report
    }

    pub fn writer_stats(&self) -> WriterStats {
        self.writer.stats()
    }

    /// Export a point-in-time backup
    pub async fn backup(&self) -> Result<PathBuf> {
        backup::export_backup(&self.store, &self.config.storage).await
    }

    /// Stop background tasks, then write all four records
    pub async fn shutdown(self) -> ShutdownReport {
        info!("Shutting down vault");
        self.maintenance.stop().await;
        self.store.stop_flushing().await;

        let flush_error = match self.store.flush_all().await {
            Ok(()) => None,
            Err(e) => {
                error!("Shutdown flush failed, possible data loss: {}", e);
                Some(e.to_string())
            }
        };

        let report = ShutdownReport {
            writer: self.writer.stats(),
            flush_error,
        };
        info!("Vault closed (clean: {})", report.is_clean());
        report
    }
}

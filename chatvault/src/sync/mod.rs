//! Inbound event handling and background maintenance
//!
//! - `ingest`: protocol events → store mutations
//! - `maintenance`: periodic retention sweep and full flush

pub mod ingest;
pub mod maintenance;

pub use ingest::{EventIngestor, IngestReport, ProtocolEvent};
pub use maintenance::MaintenanceTask;

//! chatvault - write-behind store for messaging account data
//!
//! Keeps contacts, conversation threads and messages in memory for fast
//! reads, and persists them to JSON files behind a debounce window with
//! crash-safe writes.
//!
//! ## Module Organization
//!
//! - `types/`: Data model, identity keys and errors
//! - `config/`: Configuration management
//! - `persistence/`: Durable writer, flush scheduler, bootstrap and backups
//! - `store/`: In-memory collections, metadata and retention
//! - `sync/`: Protocol event ingestion and periodic maintenance
//! - `state/`: Process-level vault lifecycle

pub mod config;
pub mod persistence;
pub mod state;
pub mod store;
pub mod sync;
pub mod types;

pub use config::AppConfig;
pub use state::Vault;
pub use store::Store;
pub use types::error::{Result, VaultError};

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            // Debug build: show debug logs for our crate, info for others
            EnvFilter::new("chatvault_lib=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });

    // Logs go to stderr; stdout carries command output
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

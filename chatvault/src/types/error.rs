//! Unified error types for the store
//!
//! This module defines error types that:
//! - Are serializable for the presentation layer
//! - Carry the collection or path involved where it matters
//! - Map library errors onto a small set of variants

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Store error type for persistence, ingestion and configuration
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum VaultError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        VaultError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for VaultError {
    fn from(err: toml::de::Error) -> Self {
        VaultError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        VaultError::Parse(err.to_string())
    }
}

/// Result type alias using VaultError
pub type Result<T> = std::result::Result<T, VaultError>;

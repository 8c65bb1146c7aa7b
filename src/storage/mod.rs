//! Persistent storage
//!
//! Settings, downloaded model artifacts and local model discovery.

pub mod downloads;
pub mod local_models;
pub mod settings;

use std::path::PathBuf;

use thiserror::Error;

use crate::types::launch::ValidationError;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid search pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Directory holding settings and configuration backups.
///
/// `DATA_DIR` wins, then the platform data directory, then `./data`.
pub fn get_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("DATA_DIR").filter(|dir| !dir.is_empty()) {
        return PathBuf::from(dir);
    }

    directories::ProjectDirs::from("com", "SwapDeck", "SwapDeck")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

/// Where configuration backups are written
pub fn get_backup_dir() -> PathBuf {
    get_data_dir().join("backups")
}

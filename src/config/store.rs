//! Configuration store
//!
//! Read/write/backup boundary for the llama-swap `config.yaml`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use thiserror::Error;
use tokio::fs;

use crate::config::ConfigDocument;
use crate::types::model::Artifact;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read configuration from {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("Failed to write configuration to {path}: {reason}")]
    Write { path: String, reason: String },
    #[error("Config file not found: {0}")]
    NotFound(String),
}

/// Result of a successful write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    /// File name of the backup taken before writing, if any
    pub backup: Option<String>,
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Load the stored document. A store that has never been written reads as empty.
    async fn read(&self) -> Result<ConfigDocument, StoreError>;

    /// Persist the document, optionally backing up the previous contents first.
    async fn write(&self, document: &ConfigDocument, backup_first: bool) -> Result<WriteReceipt, StoreError>;

    /// Current stored bytes with a suggested download name
    async fn backup(&self) -> Result<Artifact, StoreError>;

    fn location(&self) -> String;
}

/// `config.yaml` on disk, with timestamped backups in a sibling directory
pub struct YamlFileStore {
    path: PathBuf,
    backup_dir: PathBuf,
}

impl YamlFileStore {
    pub fn new(path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backup_dir: backup_dir.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_error(&self, reason: impl ToString) -> StoreError {
        StoreError::Read {
            path: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    fn write_error(&self, reason: impl ToString) -> StoreError {
        StoreError::Write {
            path: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    async fn copy_to_backups(&self) -> Result<Option<String>, StoreError> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(None);
        }

        fs::create_dir_all(&self.backup_dir)
            .await
            .map_err(|e| self.write_error(format!("cannot create backup dir: {}", e)))?;

        let name = backup_file_name();
        fs::copy(&self.path, self.backup_dir.join(&name))
            .await
            .map_err(|e| self.write_error(format!("backup failed: {}", e)))?;

        tracing::debug!("Backed up {} to {}", self.path.display(), name);
        Ok(Some(name))
    }
}

#[async_trait]
impl ConfigStore for YamlFileStore {
    async fn read(&self) -> Result<ConfigDocument, StoreError> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("Config file {} not found, starting empty", self.path.display());
                return Ok(ConfigDocument::default());
            }
            Err(e) => return Err(self.read_error(e)),
        };

        ConfigDocument::parse(&text).map_err(|e| self.read_error(e))
    }

    async fn write(&self, document: &ConfigDocument, backup_first: bool) -> Result<WriteReceipt, StoreError> {
        let text = document.render().map_err(|e| self.write_error(e))?;

        let backup = if backup_first {
            self.copy_to_backups().await?
        } else {
            None
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| self.write_error(e))?;
        }

        // Write next to the target and rename so llama-swap never sees a half-written file
        let temp_path = self.path.with_extension("yaml.tmp");
        fs::write(&temp_path, text).await.map_err(|e| self.write_error(e))?;
        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| self.write_error(e))?;

        tracing::debug!("Saved configuration to {}", self.path.display());
        Ok(WriteReceipt { backup })
    }

    async fn backup(&self) -> Result<Artifact, StoreError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(self.path.display().to_string()));
            }
            Err(e) => return Err(self.read_error(e)),
        };
        Ok(Artifact::yaml(backup_file_name(), bytes))
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// `config-backup-YYYYmmdd-HHMMSS.yaml`
pub fn backup_file_name() -> String {
    format!("config-backup-{}.yaml", Local::now().format("%Y%m%d-%H%M%S"))
}

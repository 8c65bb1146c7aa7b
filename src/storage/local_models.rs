//! Local model discovery
//!
//! Lists the `.gguf` artifacts sitting in the models directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::storage::StorageError;

/// Extension of servable model artifacts
pub const MODEL_EXTENSION: &str = "gguf";

/// A model file found on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalModelFile {
    pub file_name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Model identifier derived from a file name: `qwen.gguf` -> `qwen`.
/// Names without the extension are returned unchanged.
pub fn model_id_from_file(file_name: &str) -> &str {
    file_name
        .strip_suffix(MODEL_EXTENSION)
        .and_then(|stem| stem.strip_suffix('.'))
        .unwrap_or(file_name)
}

/// List `*.gguf` files directly inside `models_dir`, sorted by name.
///
/// A missing directory is an empty listing, not an error.
pub fn discover(models_dir: &Path) -> Result<Vec<LocalModelFile>, StorageError> {
    if !models_dir.is_dir() {
        tracing::debug!("Models directory {} does not exist", models_dir.display());
        return Ok(Vec::new());
    }

    let pattern = format!(
        "{}/*.{}",
        glob::Pattern::escape(&models_dir.to_string_lossy()),
        MODEL_EXTENSION
    );

    let mut files = Vec::new();
    for entry in glob::glob(&pattern)? {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!("Skipping unreadable model entry: {}", e);
                continue;
            }
        };
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        let size_bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        files.push(LocalModelFile {
            file_name,
            path,
            size_bytes,
        });
    }

    files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_id_from_file() {
        assert_eq!(model_id_from_file("qwen2.5-7b.gguf"), "qwen2.5-7b");
        assert_eq!(model_id_from_file("notes.txt"), "notes.txt");
        assert_eq!(model_id_from_file("weirdgguf"), "weirdgguf");
    }

    #[test]
    fn test_discover_lists_only_gguf() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.gguf"), b"bb").unwrap();
        std::fs::write(dir.path().join("a.gguf"), b"a").unwrap();
        std::fs::write(dir.path().join("readme.md"), b"").unwrap();
        std::fs::create_dir(dir.path().join("sub.gguf")).unwrap();

        let files = discover(dir.path()).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.gguf", "b.gguf"]);
        assert_eq!(files[1].size_bytes, 2);
    }

    #[test]
    fn test_discover_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover(&dir.path().join("nope")).unwrap().is_empty());
    }
}

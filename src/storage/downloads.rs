//! Model artifact acquisition
//!
//! Downloads GGUF files from arbitrary URLs (HuggingFace links included) into
//! the models directory, and imports uploaded bytes.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use crate::storage::local_models::MODEL_EXTENSION;

/// Progress is reported each time another 100 MiB lands on disk.
pub const PROGRESS_STEP_BYTES: u64 = 100 * 1024 * 1024;
/// Upper bound for imported files (50 GB)
pub const MAX_IMPORT_BYTES: u64 = 50_000_000_000;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Invalid download URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid model filename")]
    InvalidFilename,
    #[error("Only .gguf files are supported")]
    UnsupportedExtension,
    #[error("File {0} already exists")]
    AlreadyExists(String),
    #[error("File too large: {0}")]
    TooLarge(String),
    #[error("Download failed with status: {0}")]
    Status(reqwest::StatusCode),
    #[error("Download failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Write error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Download incomplete: got {got} bytes, expected {expected}")]
    Incomplete { got: u64, expected: u64 },
}

/// A download whose target has been resolved and checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDownload {
    pub url: String,
    pub filename: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub downloaded: u64,
    pub total: Option<u64>,
}

impl DownloadProgress {
    pub fn percent(&self) -> Option<f64> {
        self.total
            .filter(|total| *total > 0)
            .map(|total| self.downloaded as f64 / total as f64 * 100.0)
    }
}

/// Rewrite HuggingFace `blob` page links to the raw `resolve` endpoint.
pub fn normalize_download_url(url: &str) -> Result<String, DownloadError> {
    let trimmed = url.trim();
    let parsed = reqwest::Url::parse(trimmed).map_err(|e| DownloadError::InvalidUrl(e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(DownloadError::InvalidUrl(format!(
            "unsupported scheme '{}'",
            parsed.scheme()
        )));
    }

    let is_hf = parsed
        .host_str()
        .is_some_and(|host| host == "huggingface.co" || host.ends_with(".huggingface.co"));
    if is_hf && parsed.path().contains("/blob/") {
        let mut rewritten = parsed.clone();
        rewritten.set_path(&parsed.path().replacen("/blob/", "/resolve/", 1));
        return Ok(rewritten.to_string());
    }

    Ok(parsed.to_string())
}

/// Pick the local file name for a download.
///
/// An explicit name wins. Otherwise the last URL path segment is used when it
/// names a `.gguf` file, and a timestamped name is generated as the last resort.
/// The `.gguf` extension is always enforced.
pub fn infer_filename(url: &str, explicit: Option<&str>, now: DateTime<Local>) -> Result<String, DownloadError> {
    let candidate = match explicit.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => name.to_string(),
        None => reqwest::Url::parse(url.trim())
            .ok()
            .and_then(|parsed| {
                parsed
                    .path_segments()
                    .and_then(|mut segments| segments.next_back().map(str::to_string))
            })
            .filter(|segment| has_model_extension(segment))
            .unwrap_or_else(|| format!("model-{}.{}", now.format("%Y%m%d-%H%M%S"), MODEL_EXTENSION)),
    };

    let with_extension = if has_model_extension(&candidate) {
        candidate
    } else {
        format!("{}.{}", candidate, MODEL_EXTENSION)
    };

    sanitize_local_filename(&with_extension)
}

fn has_model_extension(name: &str) -> bool {
    name.ends_with(&format!(".{}", MODEL_EXTENSION))
}

fn sanitize_local_filename(filename: &str) -> Result<String, DownloadError> {
    let trimmed = filename.trim();
    let no_query = trimmed.split('?').next().unwrap_or(trimmed);
    let no_fragment = no_query.split('#').next().unwrap_or(no_query);
    let no_leading = no_fragment.trim_start_matches(['/', '.']);

    let flattened = no_leading.replace('\\', "/").replace('/', "__");

    let mut sanitized = String::with_capacity(flattened.len());
    for ch in flattened.chars() {
        let invalid = matches!(ch, '<' | '>' | ':' | '"' | '|' | '?' | '*');
        if invalid || ch.is_control() || ch.is_whitespace() {
            sanitized.push('_');
        } else {
            sanitized.push(ch);
        }
    }

    while sanitized.ends_with('.') || sanitized.ends_with(' ') {
        sanitized.pop();
    }

    if sanitized.is_empty() || sanitized == format!(".{}", MODEL_EXTENSION) {
        return Err(DownloadError::InvalidFilename);
    }

    Ok(sanitized)
}

/// Resolve URL and target path, refusing to overwrite an existing file.
pub async fn plan_download(
    url: &str,
    filename: Option<&str>,
    models_dir: &Path,
    now: DateTime<Local>,
) -> Result<PlannedDownload, DownloadError> {
    let url = normalize_download_url(url)?;
    let filename = infer_filename(&url, filename, now)?;
    let path = models_dir.join(&filename);

    if fs::try_exists(&path).await? {
        return Err(DownloadError::AlreadyExists(filename));
    }

    Ok(PlannedDownload { url, filename, path })
}

/// Stream a planned download to disk.
///
/// Bytes land in `<name>.tmp` first and are renamed once complete; a failed
/// download leaves nothing behind. `on_progress` fires on every 100 MiB boundary.
pub async fn download_model(
    client: &reqwest::Client,
    plan: &PlannedDownload,
    mut on_progress: impl FnMut(DownloadProgress) + Send,
) -> Result<u64, DownloadError> {
    if let Some(parent) = plan.path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let temp_path = plan.path.with_file_name(format!("{}.tmp", plan.filename));
    let result = stream_to_file(client, plan, &temp_path, &mut on_progress).await;

    match result {
        Ok(downloaded) => {
            fs::rename(&temp_path, &plan.path).await?;
            tracing::info!("Download complete: {}", plan.path.display());
            Ok(downloaded)
        }
        Err(e) => {
            if let Err(cleanup) = fs::remove_file(&temp_path).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove partial download {}: {}", temp_path.display(), cleanup);
                }
            }
            Err(e)
        }
    }
}

async fn stream_to_file(
    client: &reqwest::Client,
    plan: &PlannedDownload,
    temp_path: &Path,
    on_progress: &mut (impl FnMut(DownloadProgress) + Send),
) -> Result<u64, DownloadError> {
    tracing::info!("Downloading from: {}", plan.url);
    let mut response = client
        .get(&plan.url)
        .header("User-Agent", concat!("swapdeck/", env!("CARGO_PKG_VERSION")))
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(DownloadError::Status(response.status()));
    }

    let total = response.content_length();
    if let Some(total) = total {
        tracing::info!("File size: {} ({} bytes)", format_size(total), total);
    }

    let mut file = File::create(temp_path).await?;
    let mut downloaded: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        let before = downloaded;
        downloaded += chunk.len() as u64;
        if before / PROGRESS_STEP_BYTES != downloaded / PROGRESS_STEP_BYTES {
            on_progress(DownloadProgress { downloaded, total });
        }
    }
    file.flush().await?;

    if let Some(expected) = total {
        if downloaded != expected {
            return Err(DownloadError::Incomplete {
                got: downloaded,
                expected,
            });
        }
    }

    Ok(downloaded)
}

/// Store uploaded model bytes in the models directory.
pub async fn import_model_bytes(models_dir: &Path, filename: &str, bytes: &[u8]) -> Result<PathBuf, DownloadError> {
    if !has_model_extension(filename.trim()) {
        return Err(DownloadError::UnsupportedExtension);
    }
    if bytes.len() as u64 > MAX_IMPORT_BYTES {
        return Err(DownloadError::TooLarge(format_size(bytes.len() as u64)));
    }

    let filename = sanitize_local_filename(filename)?;
    let path = models_dir.join(&filename);
    if fs::try_exists(&path).await? {
        return Err(DownloadError::AlreadyExists(filename));
    }

    fs::create_dir_all(models_dir).await?;
    fs::write(&path, bytes).await?;
    Ok(path)
}

/// Get a human-readable size string
pub fn format_size(bytes: u64) -> String {
    let bytes = bytes as f64;
    if bytes < 1024.0 {
        format!("{} B", bytes as u64)
    } else if bytes < 1024.0 * 1024.0 {
        format!("{:.2} KB", bytes / 1024.0)
    } else if bytes < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} MB", bytes / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes / (1024.0 * 1024.0 * 1024.0))
    }
}

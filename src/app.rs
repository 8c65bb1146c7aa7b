//! Dashboard state
//!
//! The owned context behind every operator action: settings, the configuration
//! document, the activity log and alerts, plus the clients used to reach
//! llama-swap and the config store.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::Local;
use thiserror::Error;

use crate::activity::{ActivityLog, Alert, AlertCenter, AlertLevel};
use crate::config::store::{ConfigStore, StoreError, YamlFileStore};
use crate::config::{ConfigDocument, ConfigError};
use crate::storage::downloads::{self, format_size, DownloadError};
use crate::storage::local_models;
use crate::storage::settings::{Settings, SettingsStore};
use crate::storage::{get_backup_dir, StorageError};
use crate::system::prober::{Health, LatencyReport, ProbeError, ProbeStats, RemoteStatusProber, StatusReport};
use crate::system::reconcile::reconcile;
use crate::types::launch::{LaunchForm, ModelLaunchSpec, ValidationError};
use crate::types::model::{Artifact, ReconciledModel};

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error("Model '{0}' is not in the configuration")]
    UnknownModel(String),
}

impl DashboardError {
    /// Text shown to the operator. Internal failures stay in the tracing log.
    pub fn user_message(&self) -> String {
        match self {
            DashboardError::Storage(StorageError::Validation(e)) => e.to_string(),
            DashboardError::Storage(StorageError::Io(e)) => format!("Could not write settings: {}", e),
            DashboardError::Storage(_) | DashboardError::Config(ConfigError::Render(_)) => {
                "Internal error, see the service log for details".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Result of saving a model entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedModel {
    pub name: String,
    pub replaced: bool,
}

/// Result of saving settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedSettings {
    pub endpoint: String,
    pub interval_changed: bool,
}

/// A model file that just landed in the models directory
#[derive(Debug, Clone, PartialEq)]
pub struct AcquiredModel {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Prefilled entry for the new file
    pub form: LaunchForm,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T: Clone>(cell: &RwLock<T>) -> T {
    cell.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn replace<T>(cell: &RwLock<T>, value: T) {
    *cell.write().unwrap_or_else(PoisonError::into_inner) = value;
}

pub struct Dashboard {
    settings_store: SettingsStore,
    settings: RwLock<Settings>,
    last_persisted: Mutex<Settings>,
    backup_dir: PathBuf,
    store: RwLock<Arc<dyn ConfigStore>>,
    prober: RwLock<RemoteStatusProber>,
    document: tokio::sync::Mutex<ConfigDocument>,
    activity: Mutex<ActivityLog>,
    alerts: Mutex<AlertCenter>,
    status: RwLock<Option<StatusReport>>,
    models: RwLock<Vec<ReconciledModel>>,
}

impl Dashboard {
    pub fn new(settings_store: SettingsStore, settings: Settings, backup_dir: impl Into<PathBuf>) -> Self {
        let backup_dir = backup_dir.into();
        let store: Arc<dyn ConfigStore> = Arc::new(YamlFileStore::new(&settings.config_file_path, &backup_dir));
        let prober = RemoteStatusProber::new(&settings.llama_swap_url, settings.connection_timeout());

        Self {
            settings_store,
            activity: Mutex::new(ActivityLog::new(settings.max_log_entries)),
            last_persisted: Mutex::new(settings.clone()),
            settings: RwLock::new(settings),
            backup_dir,
            store: RwLock::new(store),
            prober: RwLock::new(prober),
            document: tokio::sync::Mutex::new(ConfigDocument::new()),
            alerts: Mutex::new(AlertCenter::new()),
            status: RwLock::new(None),
            models: RwLock::new(Vec::new()),
        }
    }

    /// Load settings, then the configuration. A bad config file is logged and
    /// leaves the document empty; the dashboard still starts.
    pub async fn bootstrap(settings_store: SettingsStore) -> Self {
        let loader = settings_store.clone();
        let settings = tokio::task::spawn_blocking(move || loader.load())
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Settings load task failed, using defaults: {}", e);
                Settings::default()
            });
        let dashboard = Self::new(settings_store, settings, get_backup_dir());
        dashboard.log("Dashboard started");

        if let Err(e) = dashboard.load_config().await {
            tracing::warn!("Initial configuration load failed: {}", e);
            dashboard.log(format!("Failed to load configuration: {}", e.user_message()));
        }
        dashboard
    }

    /// Swap the configuration backend.
    pub fn set_config_store(&self, store: Arc<dyn ConfigStore>) {
        replace(&self.store, store);
    }

    fn config_store(&self) -> Arc<dyn ConfigStore> {
        read(&self.store)
    }

    fn prober(&self) -> RemoteStatusProber {
        read(&self.prober)
    }

    // ---- Activity and alerts -------------------------------------------------

    pub fn log(&self, message: impl Into<String>) {
        lock(&self.activity).push(message);
    }

    pub fn notify(&self, level: AlertLevel, message: impl Into<String>) {
        lock(&self.alerts).notify(level, message);
    }

    /// Surface a failed operation: danger alert plus activity entry.
    pub fn report_error(&self, context: &str, error: &DashboardError) {
        tracing::error!("{} failed: {}", context, error);
        let message = format!("{} failed: {}", context, error.user_message());
        self.log(message.clone());
        self.notify(AlertLevel::Danger, message);
    }

    pub fn alerts(&self) -> Vec<Alert> {
        lock(&self.alerts).active(Local::now())
    }

    pub fn activity_lines(&self) -> Vec<String> {
        lock(&self.activity).lines()
    }

    pub fn export_logs(&self) -> Artifact {
        lock(&self.activity).export()
    }

    pub fn clear_logs(&self) {
        lock(&self.activity).clear();
    }

    // ---- Configuration -------------------------------------------------------

    /// Snapshot of the current document
    pub async fn document(&self) -> ConfigDocument {
        self.document.lock().await.clone()
    }

    /// Replace the in-memory document with the stored one.
    /// On failure the current document is kept.
    pub async fn load_config(&self) -> Result<usize, DashboardError> {
        let store = self.config_store();
        let mut document = self.document.lock().await;
        let loaded = store.read().await?;
        let count = loaded.len();

        *document = loaded;
        drop(document);
        self.log(format!("Loaded configuration with {} models from {}", count, store.location()));
        Ok(count)
    }

    async fn persist(&self, document: &ConfigDocument) -> Result<(), StoreError> {
        let backup_first = read(&self.settings).backup_on_change;
        let receipt = self.config_store().write(document, backup_first).await?;
        if let Some(backup) = receipt.backup {
            self.log(format!("Configuration backed up as {}", backup));
        }
        Ok(())
    }

    /// Apply `mutate` to a copy of the document and swap it in once the store
    /// accepted it. The lock is held for the whole write, so concurrent
    /// mutations queue up behind each other instead of clobbering.
    async fn mutate<T>(
        &self,
        mutate: impl FnOnce(&mut ConfigDocument) -> Result<T, DashboardError>,
    ) -> Result<T, DashboardError> {
        let mut current = self.document.lock().await;
        let mut next = current.clone();
        let result = mutate(&mut next)?;
        self.persist(&next).await?;
        *current = next;
        Ok(result)
    }

    pub async fn add_model(&self, name: &str, spec: &ModelLaunchSpec) -> Result<SavedModel, DashboardError> {
        let replaced = self
            .mutate(|doc| doc.add_entry(name, spec).map_err(DashboardError::from))
            .await?;

        let name = name.trim().to_string();
        if replaced {
            self.log(format!("Updated model configuration: {}", name));
        } else {
            self.log(format!("Added model configuration: {}", name));
        }
        Ok(SavedModel { name, replaced })
    }

    /// Validate an operator form and add the resulting entry.
    pub async fn save_model_form(&self, form: &LaunchForm) -> Result<SavedModel, DashboardError> {
        let (name, spec) = form.parse()?;
        self.add_model(&name, &spec).await
    }

    /// Form prefilled from the stored command of `name`
    pub async fn edit_form(&self, name: &str) -> Result<LaunchForm, DashboardError> {
        let name = name.trim();
        let document = self.document.lock().await;
        let spec = document
            .spec_for(name)
            .ok_or_else(|| DashboardError::UnknownModel(name.to_string()))?;
        Ok(LaunchForm::from_spec(name, &spec))
    }

    /// Returns false, without touching the store, when `name` is absent.
    pub async fn remove_model(&self, name: &str) -> Result<bool, DashboardError> {
        let name = name.trim();
        if self.document.lock().await.get(name).is_none() {
            return Ok(false);
        }

        let removed = self
            .mutate(|doc| Ok(doc.remove_entry(name).is_some()))
            .await?;
        if removed {
            self.log(format!("Removed model configuration: {}", name));
        }
        Ok(removed)
    }

    pub async fn clear_config(&self) -> Result<(), DashboardError> {
        self.mutate(|doc| {
            doc.clear();
            Ok(())
        })
        .await?;
        self.log("Cleared all model configurations");
        Ok(())
    }

    /// Replace the whole document, e.g. with an edited or uploaded config.
    pub async fn apply_document(&self, document: ConfigDocument) -> Result<usize, DashboardError> {
        let count = document.len();
        self.mutate(move |doc| {
            *doc = document;
            Ok(())
        })
        .await?;
        self.log(format!("Applied configuration with {} models", count));
        Ok(count)
    }

    pub async fn export_config(&self) -> Result<Artifact, DashboardError> {
        let text = self.document.lock().await.render()?;
        self.log("Exported configuration");
        Ok(Artifact::yaml("config.yaml", text.into_bytes()))
    }

    pub async fn backup_config(&self) -> Result<Artifact, DashboardError> {
        let artifact = self.config_store().backup().await?;
        self.log(format!("Created configuration backup {}", artifact.filename));
        Ok(artifact)
    }

    // ---- llama-swap ----------------------------------------------------------

    pub fn status(&self) -> Option<StatusReport> {
        read(&self.status)
    }

    pub fn probe_stats(&self) -> ProbeStats {
        self.prober().stats()
    }

    /// Probe liveness. Only changes of health are written to the activity log.
    pub async fn refresh_status(&self) -> StatusReport {
        let report = self.prober().probe_status().await;

        let previous = read(&self.status).map(|r| r.health.is_connected());
        if previous != Some(report.health.is_connected()) {
            match report.health {
                Health::Connected { active } => {
                    self.log(format!("Connected to llama-swap ({} active models)", active))
                }
                Health::Disconnected => self.log(format!(
                    "llama-swap is not reachable: {}",
                    report.message.as_deref().unwrap_or("unknown error")
                )),
            }
        }

        replace(&self.status, Some(report.clone()));
        report
    }

    pub async fn test_latency(&self) -> Result<LatencyReport, DashboardError> {
        let report = self.prober().probe_latency().await?;
        self.log(format!(
            "Latency test on {}: {:.2}s ({})",
            report.model,
            report.elapsed.as_secs_f64(),
            report.class.label()
        ));
        Ok(report)
    }

    /// Cached reconciled listing from the last refresh
    pub fn models(&self) -> Vec<ReconciledModel> {
        read(&self.models)
    }

    /// Rebuild the reconciled listing from a fresh probe, the document and
    /// the models directory. An unreachable llama-swap counts as no active models.
    pub async fn refresh_models(&self) -> Result<Vec<ReconciledModel>, DashboardError> {
        let settings = read(&self.settings);

        let active = match self.prober().list_models().await {
            Ok(active) => active,
            Err(e) => {
                tracing::warn!("Could not fetch active models from llama-swap: {}", e);
                self.log(format!("Could not fetch active models from llama-swap: {}", e));
                Vec::new()
            }
        };

        let local_files: Vec<String> = if settings.auto_detect_models {
            let models_path = settings.models_path.clone();
            tokio::task::spawn_blocking(move || local_models::discover(&models_path))
                .await
                .map_err(StorageError::from)??
                .into_iter()
                .map(|file| file.file_name)
                .collect()
        } else {
            Vec::new()
        };

        let models = {
            let document = self.document.lock().await;
            reconcile(&active, document.names(), &local_files)
        };

        replace(&self.models, models.clone());
        Ok(models)
    }

    // ---- Model artifacts -----------------------------------------------------

    pub async fn download_model(&self, url: &str, filename: Option<&str>) -> Result<AcquiredModel, DashboardError> {
        let models_path = read(&self.settings).models_path;
        let plan = downloads::plan_download(url, filename, &models_path, Local::now()).await?;
        self.log(format!("Starting download: {}", plan.filename));

        let client = self.prober().client().clone();
        let activity = &self.activity;
        let size_bytes = downloads::download_model(&client, &plan, |progress| {
            let message = match (progress.total, progress.percent()) {
                (Some(total), Some(percent)) => format!(
                    "Downloaded {} of {} ({:.1}%)",
                    format_size(progress.downloaded),
                    format_size(total),
                    percent
                ),
                _ => format!("Downloaded {}", format_size(progress.downloaded)),
            };
            lock(activity).push(message);
        })
        .await?;

        self.log(format!("Downloaded model: {} ({})", plan.filename, format_size(size_bytes)));
        Ok(AcquiredModel {
            form: LaunchForm::for_file(&plan.path),
            path: plan.path,
            size_bytes,
        })
    }

    pub async fn import_model(&self, filename: &str, bytes: &[u8]) -> Result<AcquiredModel, DashboardError> {
        let models_path = read(&self.settings).models_path;
        let path = downloads::import_model_bytes(&models_path, filename, bytes).await?;
        let size_bytes = bytes.len() as u64;

        self.log(format!(
            "Uploaded model: {} ({})",
            path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
            format_size(size_bytes)
        ));
        Ok(AcquiredModel {
            form: LaunchForm::for_file(&path),
            path,
            size_bytes,
        })
    }

    // ---- Settings ------------------------------------------------------------

    pub fn settings(&self) -> Settings {
        read(&self.settings)
    }

    /// Validate, persist and apply new settings.
    ///
    /// Clients are rebuilt when their inputs changed; the caller restarts
    /// polling when `interval_changed` is set.
    pub async fn save_settings(&self, settings: Settings) -> Result<SavedSettings, DashboardError> {
        let endpoint = self.write_settings(&settings).await?;
        let previous = read(&self.settings);

        if previous.config_file_path != settings.config_file_path {
            self.set_config_store(Arc::new(YamlFileStore::new(&settings.config_file_path, &self.backup_dir)));
        }
        if previous.llama_swap_url != settings.llama_swap_url
            || previous.connection_timeout != settings.connection_timeout
        {
            replace(
                &self.prober,
                RemoteStatusProber::new(&settings.llama_swap_url, settings.connection_timeout()),
            );
        }
        lock(&self.activity).set_capacity(settings.max_log_entries);

        let interval_changed = previous.refresh_interval != settings.refresh_interval;
        *lock(&self.last_persisted) = settings.clone();
        replace(&self.settings, settings);

        self.log(format!("Settings saved, API endpoint {}", endpoint));
        Ok(SavedSettings {
            endpoint,
            interval_changed,
        })
    }

    /// Write settings if they drifted from what is on disk.
    pub async fn flush_settings(&self) -> Result<bool, DashboardError> {
        let current = read(&self.settings);
        if *lock(&self.last_persisted) == current {
            return Ok(false);
        }

        self.write_settings(&current).await?;
        *lock(&self.last_persisted) = current;
        tracing::debug!("Flushed settings to {}", self.settings_store.path().display());
        Ok(true)
    }

    /// The settings file is written on the blocking pool.
    async fn write_settings(&self, settings: &Settings) -> Result<String, StorageError> {
        let store = self.settings_store.clone();
        let settings = settings.clone();
        tokio::task::spawn_blocking(move || store.save(&settings)).await?
    }

    /// Change in-memory settings without persisting. The flush task picks them up.
    pub fn update_settings(&self, update: impl FnOnce(&mut Settings)) {
        let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut settings);
    }
}

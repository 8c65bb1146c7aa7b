//! Operator actions
//!
//! Every operator interaction is an [`Action`] dispatched through [`Monitor`],
//! which also owns the periodic polling jobs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::activity::AlertLevel;
use crate::app::{AcquiredModel, Dashboard, DashboardError, SavedModel, SavedSettings};
use crate::config::ConfigDocument;
use crate::storage::settings::Settings;
use crate::system::commands::{maintenance_script, MaintenanceKind};
use crate::system::prober::{LatencyReport, StatusReport};
use crate::system::scheduler::{PeriodicTask, Scheduler};
use crate::types::launch::LaunchForm;
use crate::types::model::{Artifact, ReconciledModel};

pub const CONNECTION_PROBE: &str = "connection-probe";
pub const MODEL_REFRESH: &str = "model-refresh";
pub const SETTINGS_FLUSH: &str = "settings-flush";

pub const MODEL_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
pub const SETTINGS_FLUSH_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub enum Action {
    RefreshStatus,
    RefreshModels,
    TestLatency,
    SaveModel(LaunchForm),
    EditModel { name: String },
    RemoveModel { name: String },
    ClearConfig,
    ReloadConfig,
    ApplyConfig(ConfigDocument),
    ExportConfig,
    BackupConfig,
    DownloadModel { url: String, filename: Option<String> },
    ImportModel { filename: String, bytes: Vec<u8> },
    SaveSettings(Settings),
    ExportLogs,
    ClearLogs,
    ShowCommands(MaintenanceKind),
}

impl Action {
    /// Short label used in alerts and log lines
    pub fn label(&self) -> &'static str {
        match self {
            Action::RefreshStatus => "Status check",
            Action::RefreshModels => "Model refresh",
            Action::TestLatency => "Latency test",
            Action::SaveModel(_) => "Save model",
            Action::EditModel { .. } => "Edit model",
            Action::RemoveModel { .. } => "Remove model",
            Action::ClearConfig => "Clear configuration",
            Action::ReloadConfig => "Reload configuration",
            Action::ApplyConfig(_) => "Apply configuration",
            Action::ExportConfig => "Export configuration",
            Action::BackupConfig => "Backup configuration",
            Action::DownloadModel { .. } => "Download",
            Action::ImportModel { .. } => "Upload",
            Action::SaveSettings(_) => "Save settings",
            Action::ExportLogs => "Export logs",
            Action::ClearLogs => "Clear logs",
            Action::ShowCommands(_) => "Show commands",
        }
    }
}

#[derive(Debug, Clone)]
pub enum ActionOutcome {
    Status(StatusReport),
    Models(Vec<ReconciledModel>),
    Latency(LatencyReport),
    ModelSaved(SavedModel),
    EditForm(LaunchForm),
    ModelRemoved { name: String, existed: bool },
    ConfigCleared,
    ConfigLoaded { models: usize },
    Artifact(Artifact),
    ModelAcquired(AcquiredModel),
    SettingsSaved(SavedSettings),
    LogsCleared,
    Commands(String),
}

struct ConnectionProbeTask(Arc<Dashboard>);

#[async_trait]
impl PeriodicTask for ConnectionProbeTask {
    fn name(&self) -> &'static str {
        CONNECTION_PROBE
    }

    async fn tick(&self) {
        self.0.refresh_status().await;
    }
}

struct ModelRefreshTask(Arc<Dashboard>);

#[async_trait]
impl PeriodicTask for ModelRefreshTask {
    fn name(&self) -> &'static str {
        MODEL_REFRESH
    }

    async fn tick(&self) {
        if let Err(e) = self.0.refresh_models().await {
            tracing::warn!("Periodic model refresh failed: {}", e);
            self.0.log(format!("Periodic model refresh failed: {}", e.user_message()));
        }
    }
}

struct SettingsFlushTask(Arc<Dashboard>);

#[async_trait]
impl PeriodicTask for SettingsFlushTask {
    fn name(&self) -> &'static str {
        SETTINGS_FLUSH
    }

    async fn tick(&self) {
        if let Err(e) = self.0.flush_settings().await {
            tracing::warn!("Periodic settings flush failed: {}", e);
            self.0.log(format!("Periodic settings flush failed: {}", e.user_message()));
        }
    }
}

/// Dispatcher and polling owner for one dashboard
pub struct Monitor {
    dashboard: Arc<Dashboard>,
    scheduler: Scheduler,
}

impl Monitor {
    pub fn new(dashboard: Arc<Dashboard>) -> Self {
        Self {
            dashboard,
            scheduler: Scheduler::new(),
        }
    }

    pub fn dashboard(&self) -> &Arc<Dashboard> {
        &self.dashboard
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Start the periodic jobs. Must be called inside a tokio runtime.
    pub fn start(&self) {
        self.restart_polling();
    }

    /// Cancel every job and schedule fresh ones from current settings.
    pub fn restart_polling(&self) {
        self.scheduler.cancel_all();

        let every = self.dashboard.settings().refresh_interval();
        self.scheduler
            .schedule(Arc::new(ConnectionProbeTask(self.dashboard.clone())), every);
        self.scheduler.schedule(
            Arc::new(ModelRefreshTask(self.dashboard.clone())),
            MODEL_REFRESH_INTERVAL,
        );
        self.scheduler.schedule(
            Arc::new(SettingsFlushTask(self.dashboard.clone())),
            SETTINGS_FLUSH_INTERVAL,
        );
    }

    /// Run one action. Failures are surfaced as a danger alert and an
    /// activity entry before being returned.
    pub async fn dispatch(&self, action: Action) -> Result<ActionOutcome, DashboardError> {
        let label = action.label();
        match self.handle(action).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.dashboard.report_error(label, &e);
                Err(e)
            }
        }
    }

    async fn handle(&self, action: Action) -> Result<ActionOutcome, DashboardError> {
        let dashboard = &self.dashboard;
        match action {
            Action::RefreshStatus => Ok(ActionOutcome::Status(dashboard.refresh_status().await)),
            Action::RefreshModels => Ok(ActionOutcome::Models(dashboard.refresh_models().await?)),
            Action::TestLatency => {
                let report = dashboard.test_latency().await?;
                dashboard.notify(
                    AlertLevel::Info,
                    format!("{} answered in {:.2}s", report.model, report.elapsed.as_secs_f64()),
                );
                Ok(ActionOutcome::Latency(report))
            }
            Action::SaveModel(form) => {
                let saved = dashboard.save_model_form(&form).await?;
                let verb = if saved.replaced { "updated" } else { "added" };
                dashboard.notify(AlertLevel::Success, format!("Model {} {}", saved.name, verb));
                Ok(ActionOutcome::ModelSaved(saved))
            }
            Action::EditModel { name } => Ok(ActionOutcome::EditForm(dashboard.edit_form(&name).await?)),
            Action::RemoveModel { name } => {
                let existed = dashboard.remove_model(&name).await?;
                if existed {
                    dashboard.notify(AlertLevel::Success, format!("Model {} removed", name));
                }
                Ok(ActionOutcome::ModelRemoved { name, existed })
            }
            Action::ClearConfig => {
                dashboard.clear_config().await?;
                dashboard.notify(AlertLevel::Warning, "All model configurations cleared");
                Ok(ActionOutcome::ConfigCleared)
            }
            Action::ReloadConfig => {
                let models = dashboard.load_config().await?;
                dashboard.notify(AlertLevel::Success, format!("Loaded {} models", models));
                Ok(ActionOutcome::ConfigLoaded { models })
            }
            Action::ApplyConfig(document) => {
                let models = dashboard.apply_document(document).await?;
                dashboard.notify(AlertLevel::Success, "Configuration saved");
                Ok(ActionOutcome::ConfigLoaded { models })
            }
            Action::ExportConfig => Ok(ActionOutcome::Artifact(dashboard.export_config().await?)),
            Action::BackupConfig => {
                let artifact = dashboard.backup_config().await?;
                dashboard.notify(AlertLevel::Success, format!("Backup {} ready", artifact.filename));
                Ok(ActionOutcome::Artifact(artifact))
            }
            Action::DownloadModel { url, filename } => {
                let acquired = dashboard.download_model(&url, filename.as_deref()).await?;
                dashboard.notify(AlertLevel::Success, format!("Downloaded {}", acquired.form.name));
                Ok(ActionOutcome::ModelAcquired(acquired))
            }
            Action::ImportModel { filename, bytes } => {
                let acquired = dashboard.import_model(&filename, &bytes).await?;
                dashboard.notify(AlertLevel::Success, format!("Uploaded {}", acquired.form.name));
                Ok(ActionOutcome::ModelAcquired(acquired))
            }
            Action::SaveSettings(settings) => {
                let saved = dashboard.save_settings(settings).await?;
                if saved.interval_changed {
                    self.restart_polling();
                }
                dashboard.notify(AlertLevel::Success, "Settings saved");
                Ok(ActionOutcome::SettingsSaved(saved))
            }
            Action::ExportLogs => Ok(ActionOutcome::Artifact(dashboard.export_logs())),
            Action::ClearLogs => {
                dashboard.clear_logs();
                Ok(ActionOutcome::LogsCleared)
            }
            Action::ShowCommands(kind) => Ok(ActionOutcome::Commands(maintenance_script(kind))),
        }
    }

    /// Stop polling and write pending settings.
    pub async fn shutdown(&self) {
        self.scheduler.cancel_all();
        if let Err(e) = self.dashboard.flush_settings().await {
            tracing::error!("Failed to flush settings on shutdown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::settings::SettingsStore;
    use crate::types::launch::ModelLaunchSpec;
    use tempfile::TempDir;

    fn monitor_in(dir: &TempDir) -> Monitor {
        let settings = Settings {
            llama_swap_url: "http://127.0.0.1:1".to_string(),
            models_path: dir.path().join("models"),
            config_file_path: dir.path().join("config.yaml"),
            connection_timeout: 1,
            ..Settings::default()
        };
        let dashboard = Dashboard::new(
            SettingsStore::new(dir.path().join("settings.json")),
            settings,
            dir.path().join("backups"),
        );
        Monitor::new(Arc::new(dashboard))
    }

    #[tokio::test]
    async fn test_start_schedules_three_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = monitor_in(&dir);
        monitor.start();

        assert_eq!(
            monitor.scheduler().active_jobs(),
            vec![CONNECTION_PROBE, MODEL_REFRESH, SETTINGS_FLUSH]
        );
        assert_eq!(
            monitor.scheduler().interval_of(CONNECTION_PROBE),
            Some(Duration::from_secs(30))
        );
        monitor.shutdown().await;
        assert!(monitor.scheduler().active_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_failed_flush_tick_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = monitor_in(&dir);
        std::fs::create_dir_all(dir.path().join("settings.json")).unwrap();
        monitor.dashboard().update_settings(|s| s.backup_on_change = false);

        SettingsFlushTask(monitor.dashboard().clone()).tick().await;
        assert!(monitor
            .dashboard()
            .activity_lines()
            .iter()
            .any(|line| line.contains("Periodic settings flush failed")));
    }

    #[tokio::test]
    async fn test_saving_interval_reschedules_probe() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = monitor_in(&dir);
        monitor.start();

        let mut settings = monitor.dashboard().settings();
        settings.refresh_interval = 10;
        let outcome = monitor.dispatch(Action::SaveSettings(settings)).await.unwrap();

        assert!(matches!(
            outcome,
            ActionOutcome::SettingsSaved(SavedSettings { interval_changed: true, .. })
        ));
        assert_eq!(
            monitor.scheduler().interval_of(CONNECTION_PROBE),
            Some(Duration::from_secs(10))
        );
        assert_eq!(monitor.scheduler().active_jobs().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_action_raises_alert() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = monitor_in(&dir);

        let mut form = LaunchForm::from_spec("bad", &ModelLaunchSpec::for_file("/models/bad.gguf"));
        form.top_p = "1.5".to_string();
        assert!(monitor.dispatch(Action::SaveModel(form)).await.is_err());

        let alerts = monitor.dashboard().alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Danger);
        assert!(alerts[0].message.starts_with("Save model failed"));
        assert!(monitor
            .dashboard()
            .activity_lines()
            .iter()
            .any(|line| line.contains("Save model failed")));
    }

    #[tokio::test]
    async fn test_no_active_model_is_reported() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/v1/models"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": [] })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let monitor = monitor_in(&dir);
        let mut settings = monitor.dashboard().settings();
        settings.llama_swap_url = server.uri();
        monitor.dispatch(Action::SaveSettings(settings)).await.unwrap();

        let err = monitor.dispatch(Action::TestLatency).await.unwrap_err();
        assert!(err.to_string().contains("No active models"));
        assert!(monitor
            .dashboard()
            .alerts()
            .iter()
            .any(|alert| alert.level == AlertLevel::Danger));
    }

    #[tokio::test]
    async fn test_model_lifecycle_through_actions() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = monitor_in(&dir);

        let form = LaunchForm::from_spec("phi", &ModelLaunchSpec::for_file("/models/phi.gguf"));
        monitor.dispatch(Action::SaveModel(form)).await.unwrap();

        let outcome = monitor
            .dispatch(Action::EditModel { name: "phi".to_string() })
            .await
            .unwrap();
        assert!(matches!(outcome, ActionOutcome::EditForm(form) if form.file_path == "/models/phi.gguf"));

        let outcome = monitor.dispatch(Action::ExportConfig).await.unwrap();
        match outcome {
            ActionOutcome::Artifact(artifact) => {
                assert_eq!(artifact.filename, "config.yaml");
                let text = String::from_utf8(artifact.bytes).unwrap();
                assert!(text.contains("/app/llama-server -m /models/phi.gguf"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        monitor
            .dispatch(Action::RemoveModel { name: "phi".to_string() })
            .await
            .unwrap();
        monitor.dispatch(Action::ReloadConfig).await.unwrap();
        assert!(monitor.dashboard().document().await.is_empty());
    }

    #[tokio::test]
    async fn test_show_commands() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = monitor_in(&dir);
        let outcome = monitor
            .dispatch(Action::ShowCommands(MaintenanceKind::Restart))
            .await
            .unwrap();
        assert!(matches!(outcome, ActionOutcome::Commands(script) if script.contains("docker restart llama-swap")));
    }
}

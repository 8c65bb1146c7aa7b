//! SwapDeck monitor
//!
//! Loads settings and the llama-swap configuration, then keeps polling the
//! server until interrupted.

use std::sync::Arc;

use swapdeck::actions::{Action, ActionOutcome, Monitor};
use swapdeck::app::Dashboard;
use swapdeck::storage::settings::SettingsStore;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let settings_store = SettingsStore::default_location();
    tracing::info!("Using settings file {}", settings_store.path().display());

    let dashboard = Arc::new(Dashboard::bootstrap(settings_store).await);
    let settings = dashboard.settings();
    tracing::info!(
        "Monitoring {} every {}s (config: {}, models: {})",
        settings.llama_swap_url,
        settings.refresh_interval,
        settings.config_file_path.display(),
        settings.models_path.display()
    );

    let monitor = Monitor::new(dashboard);
    monitor.start();

    if let Ok(ActionOutcome::Models(models)) = monitor.dispatch(Action::RefreshModels).await {
        let active = models.iter().filter(|m| m.is_active).count();
        let configured = models.iter().filter(|m| m.is_configured).count();
        let local = models.iter().filter(|m| m.has_local_file).count();
        tracing::info!(
            "{} models known: {} active, {} configured, {} local",
            models.len(),
            active,
            configured,
            local
        );
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }

    tracing::info!("Shutting down");
    monitor.shutdown().await;
}

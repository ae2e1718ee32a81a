use std::sync::Arc;

use anyhow::{Context, Result};
use skycast_core::Config;
use skycast_sync::{
    Clock, DismissalTracker, DisplayMode, KeyValueStore, OpaqueForecast, SqliteStore,
    StatusEvaluator, SyncOrchestrator, SystemClock,
};

/// Set to any value to run as if the network were unreachable
const OFFLINE_ENV: &str = "SKYCAST_OFFLINE";

/// Stand-in for the platform reachability signal.
fn is_online() -> bool {
    online_from(std::env::var_os(OFFLINE_ENV))
}

fn online_from(offline: Option<std::ffi::OsString>) -> bool {
    offline.is_none()
}

#[tokio::main]
async fn main() -> Result<()> {
    skycast_core::init()?;

    let (config, _warnings) = Config::load_validated()?;
    tracing::info!("Config directory: {}", config.config_dir.display());

    std::fs::create_dir_all(&config.config_dir).context("Failed to create config directory")?;
    let store: Arc<dyn KeyValueStore> = Arc::new(
        SqliteStore::open(config.database_path(), config.cache.quota_bytes)
            .context("Failed to open forecast store")?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let orchestrator: SyncOrchestrator<OpaqueForecast> =
        SyncOrchestrator::from_config(&config, store.clone(), clock.clone())?;
    let evaluator = StatusEvaluator::from_config(&config.status, clock);
    let dismissals = DismissalTracker::from_config(&config.cache, store);

    let state = orchestrator.start().await;

    match state.display_mode() {
        DisplayMode::Loading => println!("Loading forecast..."),
        DisplayMode::Blocked => {
            if let Some(error) = &state.error {
                println!("{} ({})", error.user_message(), error);
            }
        }
        DisplayMode::Content => {
            let report = evaluator.report(is_online(), &state);

            if let Some(banner) = report.banner {
                if dismissals.is_dismissed(state.cache_timestamp) {
                    tracing::debug!("Banner {} dismissed for this snapshot", banner.as_str());
                } else {
                    let age = report.age_label.as_deref().unwrap_or("at an unknown time");
                    println!("[{}] {} Updated {}.", banner.as_str(), banner.description(), age);
                }
            }
            if let Some(error) = &state.refresh_error {
                tracing::warn!("Refresh failed: {}", error);
            }
            if report.very_old {
                println!("Warning: this forecast is very old and may no longer be accurate.");
            }

            let forecast = serde_json::to_string_pretty(&state.forecast)
                .context("Failed to render forecast")?;
            println!("{}", forecast);
        }
    }

    Ok(())
}

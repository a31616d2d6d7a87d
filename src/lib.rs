//! Report-sync and metrics core for the ad analytics dashboard.
//!
//! [`DashboardCore`] is the session entry point. It keeps the optimistic
//! report state, batches edits to the backend, tracks sync lifecycles and
//! serves metric views from a materialized cache.

pub mod api;
pub mod auto_refresh;
pub mod cache;
pub mod config;
pub mod dashboard;
pub mod errors;
pub mod metrics;
pub mod mirror;
pub mod models;
pub mod mutation_queue;
pub mod store;
pub mod sync_tracker;
pub mod view;

#[cfg(test)]
mod testing;

pub use api::{HttpReportApi, MetricsApi, ReportApi};
pub use config::CoreConfig;
pub use dashboard::{DashboardCore, RenderedView};
pub use errors::{AppError, AppResult};
pub use metrics::MetricCatalog;
pub use models::{CoreEvent, EntityTab, Report, ReportPatch, ReportStatus};

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs the json file logger under `log_dir`. `RUST_LOG` overrides the
/// default `info` filter. Calling it twice leaves the first logger in place.
pub fn init_tracing(log_dir: &Path) -> AppResult<()> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "adboard.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(format!("failed to install logger: {error}")))
}

/// Loads configuration from `path` when given, otherwise from the
/// environment, installs logging when a log directory is configured and
/// builds the HTTP-backed core.
pub fn bootstrap(config_path: Option<&Path>) -> AppResult<std::sync::Arc<DashboardCore>> {
    let config = match config_path {
        Some(path) => CoreConfig::load(path)?,
        None => CoreConfig::from_env(),
    };
    if let Some(log_dir) = &config.log_dir {
        init_tracing(log_dir)?;
    }
    tracing::info!(api_base_url = %config.api_base_url, "starting dashboard core");
    DashboardCore::from_config(config)
}

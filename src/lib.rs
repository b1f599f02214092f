pub mod cache;
pub mod catalog;
pub mod config;
pub mod connection;
pub mod dashboard;
pub mod errors;
pub mod filter;
pub mod models;
pub mod presentation;
pub mod redaction;
pub mod secrets;
pub mod warehouse;

#[cfg(feature = "desktop")]
mod desktop;

#[cfg(feature = "desktop")]
pub use desktop::run;

pub use dashboard::DashboardService;
pub use errors::{AppError, AppResult};

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// JSON logs to a daily rolling file under `log_dir`. `RUST_LOG` wins over
/// `default_filter`. Only the first call installs a subscriber.
pub fn init_tracing(log_dir: &Path, default_filter: &str) -> AppResult<()> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "dashboard.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}

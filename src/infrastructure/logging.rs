//! Tracing subscriber setup.

use std::io;

use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::infrastructure::config::Settings;

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides the configured level. Logs are appended to
/// `log_path` when set, otherwise written to stderr. Does nothing if a
/// subscriber is already installed.
///
/// # Errors
///
/// Returns an error if the log file cannot be opened.
pub fn init_logging(settings: &Settings) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.to_string()));

    if let Some(log_path) = &settings.log_path {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        if tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .try_init()
            .is_ok()
        {
            info!(path = %log_path.display(), "Logging initialized");
        }
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(io::stderr))
            .try_init();
    }

    Ok(())
}

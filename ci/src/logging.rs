//! Logging setup

use eyre::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default log directory: `<data_local_dir>/codeintel/logs`
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("codeintel")
        .join("logs")
}

/// Map a configured level name to a tracing level, defaulting to INFO
pub fn parse_level(level: Option<&str>) -> tracing::Level {
    let Some(s) = level else {
        return tracing::Level::INFO;
    };
    match s.to_uppercase().as_str() {
        "TRACE" => tracing::Level::TRACE,
        "DEBUG" => tracing::Level::DEBUG,
        "INFO" => tracing::Level::INFO,
        "WARN" | "WARNING" => tracing::Level::WARN,
        "ERROR" => tracing::Level::ERROR,
        _ => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
            tracing::Level::INFO
        }
    }
}

/// Install a file-backed subscriber writing to `<log_dir>/codeintel.log`
///
/// `RUST_LOG` directives are honoured on top of `level`. Returns the log
/// file path. Fails if a global subscriber is already installed.
pub fn setup_logging(log_dir: &Path, level: Option<&str>) -> Result<PathBuf> {
    fs::create_dir_all(log_dir).context("Failed to create log directory")?;

    let level = parse_level(level);
    let log_path = log_dir.join("codeintel.log");
    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to install tracing subscriber: {}", e))?;

    info!("Logging initialized (level: {:?})", level);
    debug!(path = %log_path.display(), "setup_logging: writing to file");
    Ok(log_path)
}

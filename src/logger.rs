use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};
use tracing_subscriber::prelude::*;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("Failed to initialize logger: {0}")]
    InitError(String),
}

fn open_log_file(config: &Config, privileged: bool) -> io::Result<(PathBuf, File)> {
    let path = config
        .log_file(privileged)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no state directory for log"))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((path, file))
}

/// Console layer plus an append-only file layer. The file is chosen by
/// privilege level; if it cannot be opened only the console is used.
pub fn init_logger(config: &Config, privileged: bool) -> Result<(), LoggerError> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level()));

    let opened = open_log_file(config, privileged);

    let file_layer = opened.as_ref().ok().and_then(|(_, file)| {
        file.try_clone().ok().map(|file| {
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(Mutex::new(file))
        })
    });

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    let result = if config.json_output() {
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_writer(io::stderr),
            )
            .try_init()
    } else {
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_writer(io::stderr)
                    .pretty(),
            )
            .try_init()
    };

    result.map_err(|e| LoggerError::InitError(e.to_string()))?;

    match opened {
        Ok((path, _)) => debug!("Logging to {}", path.display()),
        Err(e) => warn!("Log file unavailable, logging to console only: {}", e),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn logger_initializes_and_creates_log_file() {
        let temp = TempDir::new().unwrap();
        let log_path = temp.path().join("logs/agent.log");

        let mut config = Config::default();
        config.paths.root_log = log_path.display().to_string();

        let result = init_logger(&config, true);
        assert!(result.is_ok());
        assert!(log_path.is_file());
    }
}

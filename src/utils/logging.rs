//! Structured logging installation.
//!
//! Builds and installs a `tracing-subscriber` pipeline from a
//! [`LoggingConfig`]: console or file output, plain or JSON formatting,
//! with `RUST_LOG` taking precedence over the configured level when set.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};

struct FileWriter(Arc<std::fs::File>);

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        (&*self.0).write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        (&*self.0).flush()
    }
}

/// Install the global subscriber described by `config`.
///
/// Fails if a subscriber is already installed or the log file cannot be
/// opened.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string().to_lowercase()));

    if config.log_to_file {
        let path = config
            .log_file_path
            .as_deref()
            .ok_or_else(|| ProtocolError::ConfigError("log_file_path is not set".into()))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("failed to open log file: {e}")))?;
        let file = Arc::new(file);
        let make_writer = move || FileWriter(file.clone());

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(make_writer)
            .with_ansi(false);
        if config.json_format {
            builder
                .json()
                .try_init()
                .map_err(|e| ProtocolError::ConfigError(e.to_string()))?;
        } else {
            builder
                .try_init()
                .map_err(|e| ProtocolError::ConfigError(e.to_string()))?;
        }
        return Ok(());
    }

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.json_format {
        builder
            .json()
            .try_init()
            .map_err(|e| ProtocolError::ConfigError(e.to_string()))?;
    } else {
        builder
            .try_init()
            .map_err(|e| ProtocolError::ConfigError(e.to_string()))?;
    }
    Ok(())
}

use crate::config::{LogOutput, LoggingConfig};
use anyhow::{anyhow, Result};
use std::fs::{self, File};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter applied to the global subscriber: `<level>,switchyard=<level>`
pub fn filter_directive(level: &str) -> String {
    format!("{},switchyard={}", level, level)
}

/// Installs the global tracing subscriber described by `config`.
///
/// Fails if the file cannot be created or a subscriber is already installed.
pub fn setup_global_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::builder().parse(filter_directive(&config.level))?;

    match config.output {
        LogOutput::Stdout => {
            let stdout_layer = fmt::layer()
                .with_writer(std::io::stdout)
                .with_thread_ids(true)
                .with_target(true)
                .with_ansi(config.ansi)
                .with_filter(filter);

            tracing_subscriber::registry()
                .with(stdout_layer)
                .try_init()
                .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;
        }
        LogOutput::File => {
            let log_path = config
                .file_path
                .as_ref()
                .ok_or_else(|| anyhow!("logging.file_path is required when output is 'file'"))?;

            // Ensure parent directory exists
            if let Some(parent) = log_path.parent() {
                fs::create_dir_all(parent)?;
            }

            let file = File::create(log_path)?;
            let file_layer = fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_thread_ids(true)
                .with_line_number(true)
                .with_file(true)
                .with_target(true)
                .with_ansi(false)
                .with_filter(filter);

            tracing_subscriber::registry()
                .with(file_layer)
                .try_init()
                .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;
        }
    }

    Ok(())
}

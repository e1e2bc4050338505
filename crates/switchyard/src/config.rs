//! # Kernel Configuration
//!
//! TOML-backed settings for actors and logging. Every section and field has
//! a default, so an empty document is a valid configuration.
//!
//! ```toml
//! [actor]
//! processing_timeout_ms = 30000
//! stop_timeout_ms = 5000
//! default_queue = { kind = "bounded", capacity = 1024, overflow = "suspend" }
//!
//! [logging]
//! level = "debug"
//! output = "stdout"
//! ```

use crate::errors::KernelError;
use crate::port::QueuePolicy;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default per-message handler timeout
pub const DEFAULT_PROCESSING_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time `stop` waits for port loops before aborting them
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub actor: ActorConfig,
    pub logging: LoggingConfig,
}

impl KernelConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| KernelError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| KernelError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    pub processing_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    /// Queue policy for ports whose config does not name one
    pub default_queue: QueuePolicy,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            processing_timeout_ms: DEFAULT_PROCESSING_TIMEOUT.as_millis() as u64,
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT.as_millis() as u64,
            default_queue: QueuePolicy::default(),
        }
    }
}

impl ActorConfig {
    pub fn processing_timeout(&self) -> Duration {
        Duration::from_millis(self.processing_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_default_queue(mut self, queue: QueuePolicy) -> Self {
        self.default_queue = queue;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub output: LogOutput,
    /// Required when `output` is `file`
    pub file_path: Option<PathBuf>,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: LogOutput::Stdout,
            file_path: None,
            ansi: true,
        }
    }
}

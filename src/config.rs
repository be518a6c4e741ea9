//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("config parsing error: {0}")]
    Parsing(#[from] toml::de::Error),
}

/// Debugger engine settings. All fields have defaults suitable for a local
/// debug session, a TOML file may override any subset of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host of the target debug agent.
    pub host: String,
    /// Port the target opens its JDWP listener on.
    pub port: u16,
    /// Java executable used to launch the target.
    pub java: String,
    /// How many attach attempts before `start` gives up.
    pub attach_retries: u32,
    /// Delay between attach attempts, milliseconds.
    pub attach_retry_delay_ms: u64,
    /// Grace period after process launch before the first attach attempt,
    /// milliseconds. The target needs time to open its debug listener.
    pub attach_initial_delay_ms: u64,
    /// Bound of the captured stdout/stderr line buffer, oldest lines are
    /// evicted past this limit.
    pub max_console_lines: usize,
    /// Root of the target source tree.
    pub source_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5005,
            java: "java".to_string(),
            attach_retries: 10,
            attach_retry_delay_ms: 500,
            attach_initial_delay_ms: 1000,
            max_console_lines: 1000,
            source_root: PathBuf::from("."),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

// Federation Configuration
//
// Settings shared by the planner, the sources and the CLI.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default read buffer handed to the sources (bytes)
pub const DEFAULT_BUFFER_SIZE: usize = 16384;

/// Errors raised while loading a configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}

/// Configuration for planning and executing federated queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    /// Allow non-blocking (adaptive) operators; blocking ones otherwise
    pub adaptive: bool,
    /// Read buffer handed to the sources
    pub buffer_size: usize,
    /// Timeout for a single request to an endpoint, in milliseconds
    pub request_timeout_ms: u64,
    /// Use the streaming contactor, which decodes answers incrementally
    pub streaming_sources: bool,
}

impl Default for FederationConfig {
    fn default() -> Self {
        FederationConfig {
            adaptive: true,
            buffer_size: DEFAULT_BUFFER_SIZE,
            request_timeout_ms: 30_000,
            streaming_sources: false,
        }
    }
}

impl FederationConfig {
    /// Load a JSON configuration file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: FederationConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidValue("buffer_size must be positive".to_string()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue("request_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

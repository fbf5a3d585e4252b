//! Error types for scenario loading, simulation and log analysis.

use grayhole::ConfigError;
use thiserror::Error;

/// Errors that can occur while preparing or running an experiment.
#[derive(Debug, Error)]
pub enum SimError {
    /// Reading or writing a scenario, log or summary file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Scenario file is not valid TOML or has the wrong shape
    #[error("Scenario parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Summary serialization failed
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Experiment constants rejected by the engine
    #[error("Invalid experiment config: {0}")]
    Config(ConfigError),

    /// Scenario is well-formed but inconsistent
    #[error("Invalid scenario: {0}")]
    Scenario(String),
}

impl From<ConfigError> for SimError {
    fn from(err: ConfigError) -> Self {
        SimError::Config(err)
    }
}

/// Result type for simulator operations.
pub type SimResult<T> = Result<T, SimError>;

//! Error types for pick-and-place cycle operations

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CycleError>;

#[derive(Error, Debug)]
pub enum CycleError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Motion did not start within {0:?}")]
    StartTimeout(Duration),

    #[error("Motion completion not observed within {0:?}")]
    CompletionTimeout(Duration),

    #[error("Controller reported error: {0}")]
    Controller(String),

    #[error("No pose taught for index {0}")]
    UnknownPose(u32),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CycleError {
    /// True for failures that leave the cycle unable to continue.
    ///
    /// Only an advisory completion timeout is recoverable, and only when
    /// the configured policy lets it through.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CycleError::CompletionTimeout(_))
    }
}

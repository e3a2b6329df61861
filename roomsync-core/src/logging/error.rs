//! Errors raised while setting up logging

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoggingError {
    /// A global subscriber is already installed, or the log file could not be opened
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// Unknown level or otherwise unusable settings
    #[error("Invalid logging configuration: {0}")]
    InvalidConfiguration(String),
}

//! Configuration error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading, validating or saving a [`super::Config`]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML file could not be opened or read
    #[error("cannot read config file {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write config file {}: {source}", .path.display())]
    Unwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for the synchronizer's sections
    #[error("malformed config: {0}")]
    Malformed(#[from] toml::de::Error),

    #[error("cannot render config as TOML: {0}")]
    Render(#[from] toml::ser::Error),

    /// A `ROOMSYNC_*` environment variable held an unparsable value
    #[error("{var}={value:?} is not valid: {reason}")]
    BadOverride {
        var: &'static str,
        value: String,
        reason: String,
    },

    /// A setting parsed but is outside what the synchronizer accepts
    #[error("{setting} {reason}")]
    OutOfRange { setting: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn out_of_range(setting: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::OutOfRange {
            setting,
            reason: reason.into(),
        }
    }
}

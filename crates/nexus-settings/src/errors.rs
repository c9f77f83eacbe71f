//! Configuration failures. All of them are fatal at startup.

use thiserror::Error;

/// Why the relay could not be configured.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("reading settings file: {0}")]
    Io(#[from] std::io::Error),
    /// The settings file is not valid JSON or has the wrong shape.
    #[error("decoding settings file: {0}")]
    Json(#[from] serde_json::Error),
    /// No layer supplied this value; carries the environment variable name.
    #[error("{0} is not set")]
    Missing(&'static str),
    /// A value is present but unusable.
    #[error("bad setting: {0}")]
    InvalidValue(String),
}

/// Shorthand used throughout the crate.
pub type Result<T> = std::result::Result<T, SettingsError>;

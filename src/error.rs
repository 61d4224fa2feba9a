//! Error types shared across the mock server.

use thiserror::Error;

/// Errors raised by the resolver, registry and configuration layers.
#[derive(Error, Debug)]
pub enum MockError {
    /// No data layer yielded a value for the logical key.
    #[error("no mock data found for '{key}'")]
    DataNotFound { key: String },

    /// The logical key is not of the form `{system}/{module}/{entityKey}`.
    #[error("invalid logical key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl MockError {
    pub fn configuration(message: impl Into<String>) -> Self {
        MockError::Configuration {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, MockError::DataNotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, MockError>;

//! Error types for Conduit.

use thiserror::Error;

use crate::config::ConfigValidationError;

/// Result type alias using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading host configuration.
#[derive(Error, Debug)]
pub enum Error {
    /// The tool-provider configuration file failed validation.
    #[error(transparent)]
    Validation(#[from] ConfigValidationError),

    /// Host settings could not be assembled from their sources.
    #[error("Configuration error: {0}")]
    Settings(String),

    /// A configuration file could not be read.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a settings error.
    pub fn settings(msg: impl Into<String>) -> Self {
        Self::Settings(msg.into())
    }
}

impl From<figment::Error> for Error {
    fn from(e: figment::Error) -> Self {
        Self::Settings(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_error_display() {
        let err = Error::settings("vendor is empty");
        assert_eq!(err.to_string(), "Configuration error: vendor is empty");
    }

    #[test]
    fn test_read_error_names_path() {
        let err = Error::Read {
            path: "servers-config.json".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert!(err.to_string().starts_with("Failed to read servers-config.json"));
    }
}

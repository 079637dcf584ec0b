//! Errors raised by vendor clients.

use std::time::Duration;

use conduit_core::VendorKind;
use thiserror::Error;

/// A failed model request. Always fatal to the current turn.
#[derive(Debug, Error)]
pub enum VendorError {
    /// The request never got a response.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The vendor rejected the request.
    #[error("{vendor} API error: {status} - {message}")]
    Api {
        vendor: VendorKind,
        status: u16,
        message: String,
    },

    /// The response body did not have the expected shape.
    #[error("invalid {vendor} response: {source}")]
    Decode {
        vendor: VendorKind,
        #[source]
        source: serde_json::Error,
    },

    /// The vendor reported an error inside a stream.
    #[error("{vendor} stream error: {message}")]
    Stream { vendor: VendorKind, message: String },

    /// A streaming read stayed idle too long.
    #[error("no data from {vendor} for {timeout:?}")]
    Timeout { vendor: VendorKind, timeout: Duration },

    /// No API key is configured for the vendor.
    #[error("missing API key for {0} (set {var})", var = .0.api_key_var())]
    MissingApiKey(VendorKind),
}

impl VendorError {
    pub fn api(vendor: VendorKind, status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            vendor,
            status,
            message: message.into(),
        }
    }

    pub fn stream(vendor: VendorKind, message: impl Into<String>) -> Self {
        Self::Stream {
            vendor,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = VendorError::api(VendorKind::Anthropic, 401, "invalid x-api-key");
        assert_eq!(err.to_string(), "anthropic API error: 401 - invalid x-api-key");
    }

    #[test]
    fn test_missing_key_names_variable() {
        let err = VendorError::MissingApiKey(VendorKind::Google);
        assert_eq!(err.to_string(), "missing API key for google (set GOOGLE_API_KEY)");
    }
}

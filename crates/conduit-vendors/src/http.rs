//! Request plumbing shared by the vendor clients.

use std::time::Duration;

use conduit_core::VendorKind;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::error;

use crate::error::VendorError;

/// Default bound on a whole non-streaming request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Default bound on connection setup.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn build_client(request_timeout: Option<Duration>) -> Result<Client, VendorError> {
    let mut builder = Client::builder().connect_timeout(DEFAULT_CONNECT_TIMEOUT);
    if let Some(timeout) = request_timeout {
        builder = builder.timeout(timeout);
    }
    Ok(builder.build()?)
}

/// Pass a success response through; turn anything else into [`VendorError::Api`].
pub(crate) async fn check_response(
    vendor: VendorKind,
    response: Response,
) -> Result<Response, VendorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body);
    error!("{} API error: {} - {}", vendor, status, message);
    Err(VendorError::api(vendor, status.as_u16(), message))
}

/// Decode a JSON body into `T`.
pub(crate) async fn decode<T: DeserializeOwned>(
    vendor: VendorKind,
    response: Response,
) -> Result<T, VendorError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|source| VendorError::Decode { vendor, source })
}

/// The human-readable part of a vendor error body.
///
/// All three vendors nest it under `error.message`; anything else is returned as is.
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// Join a base URL and a path without doubling slashes.
pub(crate) fn join(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_from_json() {
        let body = r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#;
        assert_eq!(error_message(body), "invalid x-api-key");
    }

    #[test]
    fn test_error_message_plain_text() {
        assert_eq!(error_message("  Bad Gateway\n"), "Bad Gateway");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("https://api.openai.com/v1/", "/chat/completions"), "https://api.openai.com/v1/chat/completions");
        assert_eq!(join("http://localhost:8080", "messages"), "http://localhost:8080/messages");
    }
}

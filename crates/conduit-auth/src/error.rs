//! Authentication errors.

use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Body detail of every rejected request.
pub const UNAUTHORIZED_DETAIL: &str = "Invalid or missing API key";

/// A request that could not be authenticated.
///
/// Both variants answer with the same 401 body so callers cannot tell a
/// wrong key from a missing one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("no API key supplied")]
    MissingKey,

    #[error("API key not recognised")]
    InvalidKey,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": UNAUTHORIZED_DETAIL })),
        )
            .into_response()
    }
}

/// A user table that could not be loaded.
#[derive(Debug, Error)]
pub enum UserDbError {
    #[error("failed to read user table {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid user table: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("users '{first}' and '{second}' share an API key")]
    DuplicateKey { first: String, second: String },

    #[error("user '{0}' has an empty API key")]
    EmptyKey(String),
}

//! # conduit-auth
//!
//! Static API-key authentication for tool providers served over HTTP.
//!
//! A [`UserDb`] maps API keys to users; [`require_api_key`] is an axum
//! middleware that rejects unauthenticated requests with a 401 and attaches
//! the [`AuthenticatedUser`] to the rest.

pub mod error;
pub mod middleware;
pub mod users;

pub use error::{AuthError, UserDbError};
pub use middleware::{extract_api_key, is_exempt, require_api_key};
pub use users::{AuthenticatedUser, UserDb, UserRecord};

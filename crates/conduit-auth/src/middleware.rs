//! API-key middleware for axum routers.
//!
//! ```ignore
//! let users = Arc::new(UserDb::load("users.json")?);
//! let app = Router::new()
//!     .route("/sse", get(sse_handler))
//!     .layer(middleware::from_fn_with_state(users, require_api_key));
//! ```

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use crate::error::AuthError;
use crate::users::UserDb;

/// Header carrying the key directly.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Query parameter carrying the key, for clients that cannot set headers.
pub const API_KEY_QUERY: &str = "api_key";

/// Paths served without a key.
const EXEMPT_PATHS: &[&str] = &["/docs", "/redoc", "/openapi.json", "/messages"];

/// Prefix of the message-posting endpoints, also served without a key.
const EXEMPT_PREFIX: &str = "/messages/";

/// Whether `path` bypasses authentication.
pub fn is_exempt(path: &str) -> bool {
    EXEMPT_PATHS.contains(&path) || path.starts_with(EXEMPT_PREFIX)
}

/// The key presented by a request: `x-api-key`, then a bearer token, then
/// the `api_key` query parameter. Empty values count as absent.
pub fn extract_api_key(request: &Request) -> Option<String> {
    let headers = request.headers();

    let header = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());
    if let Some(key) = header {
        return Some(key.to_string());
    }

    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|v| !v.is_empty());
    if let Some(key) = bearer {
        return Some(key.to_string());
    }

    let query = request.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(name, value)| name == API_KEY_QUERY && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}

/// Reject requests without a known key; attach the user to the rest.
///
/// Handlers read the identity with `Extension<AuthenticatedUser>`.
pub async fn require_api_key(
    State(users): State<Arc<UserDb>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let path = request.uri().path();
    if is_exempt(path) {
        debug!(path, "Unauthenticated path");
        return Ok(next.run(request).await);
    }

    let key = extract_api_key(&request).ok_or(AuthError::MissingKey)?;
    let user = users.lookup(&key).ok_or_else(|| {
        warn!(path = %request.uri().path(), "Rejected unknown API key");
        AuthError::InvalidKey
    })?;

    debug!(user = %user.username, role = %user.role, "Authenticated request");
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        middleware,
        routing::{get, post},
        Extension, Router,
    };
    use tower::ServiceExt;

    use super::*;
    use crate::error::UNAUTHORIZED_DETAIL;
    use crate::users::{AuthenticatedUser, SAMPLE_USERS};

    async fn whoami(Extension(user): Extension<AuthenticatedUser>) -> String {
        format!("{} ({})", user.full_name, user.role)
    }

    async fn open() -> &'static str {
        "open"
    }

    fn app() -> Router {
        let users = Arc::new(UserDb::from_json(SAMPLE_USERS).unwrap());
        Router::new()
            .route("/sse", get(whoami))
            .route("/docs", get(open))
            .route("/messages", post(open))
            .route("/messages/", post(open))
            .route("/messages/{session}", post(open))
            .layer(middleware::from_fn_with_state(users, require_api_key))
    }

    async fn send(request: Request<Body>) -> (StatusCode, String) {
        let response = app().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn get_request(uri: &str) -> axum::http::request::Builder {
        Request::builder().method("GET").uri(uri)
    }

    #[tokio::test]
    async fn test_header_key() {
        let (status, body) = send(
            get_request("/sse")
                .header("x-api-key", "password123")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Felix Kewa (admin)");
    }

    #[tokio::test]
    async fn test_bearer_key() {
        let (status, body) = send(
            get_request("/sse")
                .header("Authorization", "Bearer alicepass456")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Alice Johnson (developer)");
    }

    #[tokio::test]
    async fn test_query_key() {
        let (status, body) = send(
            get_request("/sse?foo=1&api_key=bobsecret789")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Bob Smith (viewer)");
    }

    #[tokio::test]
    async fn test_header_takes_precedence() {
        let (status, body) = send(
            get_request("/sse?api_key=password123")
                .header("x-api-key", "bobsecret789")
                .header("Authorization", "Bearer alicepass456")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Bob Smith (viewer)");
    }

    #[tokio::test]
    async fn test_missing_key_is_401() {
        let (status, body) = send(get_request("/sse").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["detail"], UNAUTHORIZED_DETAIL);
    }

    #[tokio::test]
    async fn test_wrong_key_is_401() {
        let (status, body) = send(
            get_request("/sse")
                .header("x-api-key", "letmein")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, r#"{"detail":"Invalid or missing API key"}"#);
    }

    #[tokio::test]
    async fn test_non_bearer_authorization_is_ignored() {
        let (status, _) = send(
            get_request("/sse")
                .header("Authorization", "Basic cGFzc3dvcmQxMjM=")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_exempt_paths_skip_auth() {
        let (status, body) = send(get_request("/docs").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "open");

        for uri in ["/messages", "/messages/", "/messages/abc?session_id=1"] {
            let (status, _) = send(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
            assert_eq!(status, StatusCode::OK, "{uri}");
        }
    }

    #[test]
    fn test_is_exempt() {
        assert!(is_exempt("/openapi.json"));
        assert!(is_exempt("/messages/xyz"));
        assert!(!is_exempt("/messagesx"));
        assert!(!is_exempt("/sse"));
    }
}

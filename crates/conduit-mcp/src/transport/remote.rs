//! Plumbing shared by the HTTP-based transports.

use std::time::Duration;

use conduit_core::sse::{SseEvent, SseParser};
use conduit_core::RemoteConfig;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// Inbound half of a remote transport: raw messages, or the error that ended the stream.
pub(crate) type Inbound = mpsc::UnboundedReceiver<Result<String, TransportError>>;
pub(crate) type InboundSender = mpsc::UnboundedSender<Result<String, TransportError>>;

/// Build the HTTP client for one provider.
pub(crate) fn build_client(connect_timeout: Duration) -> Result<Client, TransportError> {
    Ok(Client::builder().connect_timeout(connect_timeout).build()?)
}

/// Headers sent on every request, currently just the bearer token.
pub(crate) fn base_headers(remote: &RemoteConfig) -> Result<HeaderMap, TransportError> {
    let mut headers = HeaderMap::new();
    if let Some(token) = &remote.access_token {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| TransportError::Protocol("access token is not a valid header value".to_string()))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }
    Ok(headers)
}

/// Turn a non-success response into [`TransportError::Status`].
pub(crate) async fn check_status(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Drive an SSE byte stream, handing each event to `on_event`.
///
/// Returns `Ok(())` when the stream ends, `on_event` returns `false`, or
/// `cancel` fires. Each read may stay idle for at most `read_timeout`.
pub(crate) async fn pump_events<S, B, F>(
    mut stream: S,
    read_timeout: Duration,
    cancel: CancellationToken,
    mut on_event: F,
) -> Result<(), TransportError>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
    F: FnMut(SseEvent) -> bool,
{
    let mut parser = SseParser::new();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = tokio::time::timeout(read_timeout, stream.next()) => next,
        };

        match next {
            Err(_) => return Err(TransportError::Timeout(read_timeout)),
            Ok(None) => {
                if let Some(event) = parser.finish() {
                    on_event(event);
                }
                return Ok(());
            }
            Ok(Some(Err(e))) => return Err(TransportError::Http(e)),
            Ok(Some(Ok(chunk))) => {
                for event in parser.feed(chunk.as_ref()) {
                    if !on_event(event) {
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Pull the next inbound message, marking the transport closed on failure.
pub(crate) async fn next_inbound(
    inbound: &mut Inbound,
    connected: &mut bool,
) -> Result<String, TransportError> {
    if !*connected {
        return Err(TransportError::NotConnected);
    }

    match inbound.recv().await {
        Some(Ok(message)) => {
            tracing::debug!(message = %message, "Received message from MCP server");
            Ok(message)
        }
        Some(Err(e)) => {
            *connected = false;
            Err(e)
        }
        None => {
            *connected = false;
            Err(TransportError::ConnectionClosed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use url::Url;

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = Result<&'static [u8], reqwest::Error>> + Unpin {
        stream::iter(parts.iter().map(|p| Ok(p.as_bytes())).collect::<Vec<_>>())
    }

    #[test]
    fn test_bearer_header() {
        let remote = RemoteConfig {
            url: Url::parse("http://localhost:8000/sse").unwrap(),
            access_token: Some("password123".to_string()),
        };
        let headers = base_headers(&remote).unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer password123");

        let remote = RemoteConfig {
            access_token: None,
            ..remote
        };
        assert!(base_headers(&remote).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pump_events_across_chunks() {
        let mut seen = Vec::new();
        let result = pump_events(
            chunks(&["event: endpoint\ndata: /mess", "ages\n\ndata: {}\n\n"]),
            Duration::from_secs(1),
            CancellationToken::new(),
            |event| {
                seen.push((event.kind().to_string(), event.data));
                true
            },
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(
            seen,
            vec![
                ("endpoint".to_string(), "/messages".to_string()),
                ("message".to_string(), "{}".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_pump_events_stops_when_handler_declines() {
        let mut count = 0;
        pump_events(
            chunks(&["data: 1\n\ndata: 2\n\ndata: 3\n\n"]),
            Duration::from_secs(1),
            CancellationToken::new(),
            |_| {
                count += 1;
                false
            },
        )
        .await
        .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_pump_events_idle_timeout() {
        let pending = stream::pending::<Result<&'static [u8], reqwest::Error>>();
        let result = pump_events(
            pending,
            Duration::from_millis(20),
            CancellationToken::new(),
            |_| true,
        )
        .await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_pump_events_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pending = stream::pending::<Result<&'static [u8], reqwest::Error>>();
        let result = pump_events(pending, Duration::from_secs(5), cancel, |_| true).await;
        assert!(result.is_ok());
    }
}

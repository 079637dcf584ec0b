//! Legacy HTTP+SSE transport.
//!
//! The client opens a long-lived `GET` event stream. The server's first
//! `endpoint` event names the URL that outbound messages are POSTed to; every
//! later `message` event carries one JSON-RPC message for the client.

use std::time::Duration;

use async_trait::async_trait;
use conduit_core::sse::SseEvent;
use conduit_core::{RemoteConfig, TransportKind};
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::remote::{self, Inbound, InboundSender};
use super::Transport;
use crate::error::TransportError;

/// HTTP+SSE transport for MCP servers.
pub struct SseTransport {
    client: Client,
    headers: HeaderMap,
    /// Where outbound messages are POSTed, announced by the server.
    endpoint: Url,
    inbound: Inbound,
    cancel: CancellationToken,
    reader: Option<JoinHandle<()>>,
    connected: bool,
}

impl SseTransport {
    /// Open the event stream and wait for the server's endpoint announcement.
    ///
    /// Both the initial response and the endpoint event must arrive within
    /// `timeout`; afterwards the stream may stay idle for `read_timeout`.
    pub async fn connect(
        remote: &RemoteConfig,
        timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = remote::build_client(timeout)?;
        let headers = remote::base_headers(remote)?;

        debug!(url = %remote.url, "Opening SSE stream");

        let request = client
            .get(remote.url.clone())
            .headers(headers.clone())
            .header(ACCEPT, "text/event-stream")
            .send();
        let response = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;
        let response = remote::check_status(response).await?;

        let (tx, mut inbound) = mpsc::unbounded_channel();
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let reader = tokio::spawn(read_stream(
            response.bytes_stream(),
            read_timeout,
            cancel.clone(),
            endpoint_tx,
            tx,
        ));

        let announced = match tokio::time::timeout(timeout, endpoint_rx).await {
            Ok(Ok(announced)) => announced,
            Ok(Err(_)) => {
                // The reader finished first and left its reason in the channel
                let err = match inbound.try_recv() {
                    Ok(Err(e)) => e,
                    _ => TransportError::Protocol(
                        "event stream ended before an endpoint event".to_string(),
                    ),
                };
                return Err(err);
            }
            Err(_) => {
                cancel.cancel();
                reader.abort();
                return Err(TransportError::Timeout(timeout));
            }
        };

        let endpoint = match resolve_endpoint(&remote.url, &announced) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                cancel.cancel();
                reader.abort();
                return Err(e);
            }
        };

        debug!(endpoint = %endpoint, "SSE endpoint announced");

        Ok(Self {
            client,
            headers,
            endpoint,
            inbound,
            cancel,
            reader: Some(reader),
            connected: true,
        })
    }
}

/// Resolve the announced endpoint against the stream URL.
///
/// The endpoint must stay on the stream's origin so the bearer token is
/// never sent elsewhere.
fn resolve_endpoint(base: &Url, announced: &str) -> Result<Url, TransportError> {
    let endpoint = base.join(announced.trim()).map_err(|e| {
        TransportError::Protocol(format!("invalid endpoint '{}': {}", announced, e))
    })?;

    if endpoint.origin() != base.origin() {
        return Err(TransportError::Protocol(format!(
            "endpoint origin {} does not match {}",
            endpoint.origin().ascii_serialization(),
            base.origin().ascii_serialization()
        )));
    }

    Ok(endpoint)
}

async fn read_stream<S, B>(
    stream: S,
    read_timeout: Duration,
    cancel: CancellationToken,
    endpoint_tx: oneshot::Sender<String>,
    tx: InboundSender,
) where
    S: futures::Stream<Item = Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    let mut endpoint_tx = Some(endpoint_tx);

    let result = remote::pump_events(stream, read_timeout, cancel, |event: SseEvent| {
        match event.kind() {
            "endpoint" => {
                match endpoint_tx.take() {
                    Some(sender) => {
                        let _ = sender.send(event.data);
                    }
                    None => warn!("Ignoring repeated SSE endpoint event"),
                }
                true
            }
            "message" => tx.send(Ok(event.data)).is_ok(),
            other => {
                debug!(event = other, "Ignoring SSE event");
                true
            }
        }
    })
    .await;

    let reason = result.err().unwrap_or(TransportError::ConnectionClosed);
    debug!(reason = %reason, "SSE stream finished");
    let _ = tx.send(Err(reason));
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        debug!(message = message, "Posting message to MCP server");

        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(message.to_string())
            .send()
            .await?;
        remote::check_status(response).await?;

        Ok(())
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        remote::next_inbound(&mut self.inbound, &mut self.connected).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.reader.is_none() {
            return Ok(());
        }

        debug!(endpoint = %self.endpoint, "Closing SSE transport");
        self.connected = false;
        self.cancel.cancel();
        if let Some(reader) = self.reader.take() {
            let _ = reader.await;
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_endpoint() {
        let base = Url::parse("http://localhost:8000/sse").unwrap();
        let endpoint = resolve_endpoint(&base, "/messages/?session_id=abc").unwrap();
        assert_eq!(endpoint.as_str(), "http://localhost:8000/messages/?session_id=abc");
    }

    #[test]
    fn test_resolve_rejects_foreign_origin() {
        let base = Url::parse("http://localhost:8000/sse").unwrap();
        let err = resolve_endpoint(&base, "http://evil.example.com/messages").unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_connect_refused_is_error() {
        // Nothing listens on port 9 of localhost in test environments
        let remote = RemoteConfig {
            url: Url::parse("http://127.0.0.1:9/sse").unwrap(),
            access_token: None,
        };
        let result =
            SseTransport::connect(&remote, Duration::from_secs(2), Duration::from_secs(20)).await;
        assert!(result.is_err());
    }
}

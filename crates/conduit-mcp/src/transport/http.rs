//! Streamable HTTP transport.
//!
//! Each outbound message is its own POST. The reply body is either a single
//! JSON message (or batch), an SSE stream of messages, or empty with
//! `202 Accepted`. The server may assign a session id on the first reply,
//! which is echoed on every later request.

use std::time::Duration;

use async_trait::async_trait;
use conduit_core::{RemoteConfig, TransportKind};
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::remote::{self, Inbound, InboundSender};
use super::Transport;
use crate::error::TransportError;
use crate::protocol::{Incoming, RequestId};

/// Header carrying the server-assigned session id.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// SSE reply stream opened by one POST.
struct ReplyStream {
    /// Request the POST carried, if it carried one.
    request: Option<RequestId>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Streamable HTTP transport for MCP servers.
pub struct StreamableHttpTransport {
    client: Client,
    headers: HeaderMap,
    url: Url,
    session_id: Option<String>,
    read_timeout: Duration,
    tx: InboundSender,
    inbound: Inbound,
    cancel: CancellationToken,
    streams: Vec<ReplyStream>,
    connected: bool,
}

impl StreamableHttpTransport {
    /// Prepare a transport for `remote`.
    ///
    /// No request is made until the first message is sent.
    pub fn connect(
        remote: &RemoteConfig,
        timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let (tx, inbound) = mpsc::unbounded_channel();

        Ok(Self {
            client: remote::build_client(timeout)?,
            headers: remote::base_headers(remote)?,
            url: remote.url.clone(),
            session_id: None,
            read_timeout,
            tx,
            inbound,
            cancel: CancellationToken::new(),
            streams: Vec::new(),
            connected: true,
        })
    }

    fn absorb_session_id(&mut self, response: &Response) {
        let assigned = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok());

        if let Some(id) = assigned {
            if self.session_id.as_deref() != Some(id) {
                debug!(session_id = id, "MCP session id assigned");
                self.session_id = Some(id.to_string());
            }
        }
    }

    /// Pump the SSE reply to one POST into the inbound queue.
    ///
    /// The stream ends after the response to `request`. Its failure is
    /// logged and costs only that request; the transport stays up.
    fn spawn_reply_stream(&mut self, response: Response, request: Option<RequestId>) {
        let tx = self.tx.clone();
        let cancel = self.cancel.child_token();
        let read_timeout = self.read_timeout;
        let expected = request.clone();

        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                let result = remote::pump_events(response.bytes_stream(), read_timeout, cancel, |event| {
                    if event.kind() != "message" {
                        return true;
                    }
                    let done = expected
                        .as_ref()
                        .is_some_and(|id| answers(&event.data, id));
                    tx.send(Ok(event.data)).is_ok() && !done
                })
                .await;

                if let Err(e) = result {
                    warn!(request = ?expected, error = %e, "Reply stream failed");
                }
            }
        });

        self.streams.retain(|stream| !stream.task.is_finished());
        self.streams.push(ReplyStream {
            request,
            cancel,
            task,
        });
    }

    fn enqueue_json(&self, body: &str) -> Result<(), TransportError> {
        let body = body.trim();
        if body.is_empty() {
            return Ok(());
        }

        // A batch is unpacked so the session sees one message at a time
        if body.starts_with('[') {
            let batch: Vec<Value> = serde_json::from_str(body)
                .map_err(|e| TransportError::Protocol(format!("invalid JSON batch: {}", e)))?;
            for message in batch {
                let _ = self.tx.send(Ok(message.to_string()));
            }
        } else {
            let _ = self.tx.send(Ok(body.to_string()));
        }

        Ok(())
    }
}

/// Whether `data` is the response to `id`.
fn answers(data: &str, id: &RequestId) -> bool {
    matches!(Incoming::parse(data), Ok(Incoming::Response { id: got, .. }) if got == *id)
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        debug!(message = message, url = %self.url, "Posting message to MCP server");
        let request_id = match Incoming::parse(message) {
            Ok(Incoming::Request { id, .. }) => Some(id),
            _ => None,
        };

        let mut request = self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .header(CONTENT_TYPE, "application/json");
        if let Some(id) = &self.session_id {
            request = request.header(SESSION_HEADER, id);
        }

        let response = remote::check_status(request.body(message.to_string()).send().await?).await?;
        self.absorb_session_id(&response);

        if response.status() == StatusCode::ACCEPTED {
            return Ok(());
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);

        if is_event_stream {
            self.spawn_reply_stream(response, request_id);
        } else {
            let body = response.text().await?;
            self.enqueue_json(&body)?;
        }

        Ok(())
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        remote::next_inbound(&mut self.inbound, &mut self.connected).await
    }

    fn abandon(&mut self, request: &RequestId) {
        for stream in &self.streams {
            if stream.request.as_ref() == Some(request) {
                debug!(request = %request, "Cancelling reply stream");
                stream.cancel.cancel();
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.connected && self.streams.is_empty() && self.session_id.is_none() {
            return Ok(());
        }

        debug!(url = %self.url, "Closing streamable HTTP transport");
        self.connected = false;
        self.cancel.cancel();
        for stream in self.streams.drain(..) {
            let _ = stream.task.await;
        }

        // Ending the server-side session is a courtesy; failures are ignored
        if let Some(id) = self.session_id.take() {
            let result = self
                .client
                .delete(self.url.clone())
                .headers(self.headers.clone())
                .header(SESSION_HEADER, id)
                .send()
                .await;
            if let Err(e) = result {
                debug!(error = %e, "Failed to terminate MCP session");
            }
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

impl Drop for StreamableHttpTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

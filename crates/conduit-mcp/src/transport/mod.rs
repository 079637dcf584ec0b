//! MCP transport implementations.
//!
//! Every transport is a duplex channel of JSON-RPC text messages, whatever
//! carries them underneath:
//! - [`StdioTransport`]: child process, newline-delimited JSON
//! - [`SseTransport`]: legacy HTTP+SSE (GET event stream, POSTed messages)
//! - [`StreamableHttpTransport`]: one POST per message, JSON or SSE replies

use async_trait::async_trait;
use conduit_core::{ServerConfig, TransportConfig, TransportKind};

use crate::error::TransportError;
use crate::protocol::RequestId;

mod http;
mod remote;
mod sse;
mod stdio;

pub use http::StreamableHttpTransport;
pub use sse::SseTransport;
pub use stdio::StdioTransport;

/// Trait for MCP transport implementations.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Wire transport in use.
    fn kind(&self) -> TransportKind;

    /// Send a message to the server.
    async fn send(&mut self, message: &str) -> Result<(), TransportError>;

    /// Receive the next message from the server.
    ///
    /// Must be cancel safe: the session polls it alongside outbound work.
    async fn receive(&mut self) -> Result<String, TransportError>;

    /// Stop waiting on anything tied to `request`, which its caller gave up on.
    fn abandon(&mut self, _request: &RequestId) {}

    /// Close the transport connection. Closing twice is a no-op.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if the transport is connected.
    fn is_connected(&self) -> bool;
}

/// Opens transports for provider configurations.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish the channel described by `config`.
    async fn open(&self, config: &ServerConfig) -> Result<Box<dyn Transport>, TransportError>;
}

/// Connector for the real stdio, sse and http transports.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConnector;

#[async_trait]
impl Connector for DefaultConnector {
    async fn open(&self, config: &ServerConfig) -> Result<Box<dyn Transport>, TransportError> {
        let transport: Box<dyn Transport> = match &config.transport {
            TransportConfig::Stdio(stdio) => Box::new(StdioTransport::spawn(stdio).await?),
            TransportConfig::Sse(remote) => Box::new(
                SseTransport::connect(remote, config.timeout(), config.read_timeout()).await?,
            ),
            TransportConfig::Http(remote) => Box::new(StreamableHttpTransport::connect(
                remote,
                config.timeout(),
                config.read_timeout(),
            )?),
        };
        Ok(transport)
    }
}

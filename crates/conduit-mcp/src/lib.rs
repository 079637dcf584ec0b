//! # conduit-mcp
//!
//! MCP (Model Context Protocol) host side for Conduit.
//!
//! This crate provides:
//! - stdio, legacy SSE and streamable HTTP transports
//! - Provider sessions with the initialize handshake and timeouts
//! - A registry that starts providers and aggregates their tools
//! - Qualified tool naming with allow/deny filtering

pub mod error;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod tools;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{McpError, TransportError};
pub use logging::{LogSink, TracingLogSink};
pub use protocol::{CallToolResult, McpToolDefinition, ToolContent};
pub use registry::{SessionRegistry, StartupReport};
pub use session::{ConnectionState, ProviderSession};
pub use tools::{qualify, split_qualified, ToolDescriptor, ToolFilter};
pub use transport::{Connector, DefaultConnector, Transport};

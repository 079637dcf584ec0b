//! Error types for tool dispatch and conversation turns.

use conduit_core::VendorKind;
use conduit_mcp::McpError;
use conduit_vendors::VendorError;
use thiserror::Error;

/// A tool call that could not be served.
///
/// Never fatal: the loops render it inline and carry on with the turn.
#[derive(Debug, Error)]
pub enum ToolDispatchError {
    /// The name has no `provider-tool` shape.
    #[error("tool name '{0}' does not name a provider")]
    InvalidName(String),

    /// No session carries the provider part of the name.
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    /// The provider's allow or deny list excludes the tool.
    #[error("tool '{tool}' is not allowed on provider '{provider}'")]
    Filtered { provider: String, tool: String },

    /// The model produced arguments that are not a JSON object.
    #[error("invalid arguments for '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },

    /// The provider failed to run the call.
    #[error("call to '{provider}-{tool}' failed: {source}")]
    Call {
        provider: String,
        tool: String,
        #[source]
        source: McpError,
    },
}

impl ToolDispatchError {
    /// The text shown to the user and the model in place of a result.
    pub fn inline(&self) -> String {
        format!("[tool error: {}]", self)
    }
}

/// A turn that could not complete.
#[derive(Debug, Error)]
pub enum TurnError {
    /// The model request failed or was rejected.
    #[error(transparent)]
    Upstream(#[from] VendorError),

    /// The model kept asking for tools past the round limit.
    #[error("stopped after {0} tool rounds without a final answer")]
    RoundLimit(usize),

    /// The model returned no choices or candidates at all.
    #[error("{0} returned an empty response")]
    EmptyResponse(VendorKind),
}

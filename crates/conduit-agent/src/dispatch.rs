//! Routing of qualified tool calls back to the provider that owns them.
//!
//! The loops never talk to sessions directly; they go through a
//! [`ToolRouter`], which the session registry implements and tests replace.

use async_trait::async_trait;
use conduit_mcp::{split_qualified, CallToolResult, SessionRegistry, ToolDescriptor};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ToolDispatchError;

/// Source of the merged tool catalogue and sink for tool calls.
#[async_trait]
pub trait ToolRouter: Send + Sync {
    /// Every permitted tool across all providers.
    async fn descriptors(&self) -> Vec<ToolDescriptor>;

    /// Invoke a tool by its qualified `provider-tool` name.
    async fn dispatch(
        &self,
        qualified_name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult, ToolDispatchError>;
}

#[async_trait]
impl ToolRouter for SessionRegistry {
    async fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tool_descriptors().await
    }

    async fn dispatch(
        &self,
        qualified_name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult, ToolDispatchError> {
        let (provider, tool) = split_qualified(qualified_name)
            .ok_or_else(|| ToolDispatchError::InvalidName(qualified_name.to_string()))?;

        let session = self
            .resolve(provider)
            .map_err(|_| ToolDispatchError::UnknownProvider(provider.to_string()))?;

        if !session.filter().permits(tool) {
            warn!(server = provider, tool, "Model requested a filtered tool");
            return Err(ToolDispatchError::Filtered {
                provider: provider.to_string(),
                tool: tool.to_string(),
            });
        }

        debug!(server = provider, tool, "Dispatching tool call");
        session
            .call_tool(tool, arguments)
            .await
            .map_err(|source| ToolDispatchError::Call {
                provider: provider.to_string(),
                tool: tool.to_string(),
                source,
            })
    }
}

/// Decode the JSON-encoded arguments a model attached to a call.
///
/// Empty input means no arguments. Anything but an object or `null` is rejected.
pub fn parse_arguments(tool: &str, raw: &str) -> Result<Option<Value>, ToolDispatchError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }

    let invalid = |message: String| ToolDispatchError::InvalidArguments {
        tool: tool.to_string(),
        message,
    };

    match serde_json::from_str::<Value>(raw).map_err(|e| invalid(e.to_string()))? {
        Value::Null => Ok(None),
        value @ Value::Object(_) => Ok(Some(value)),
        other => Err(invalid(format!("expected an object, got {}", other))),
    }
}

/// Treat a non-object argument value from a model as no arguments.
pub(crate) fn object_arguments(value: &Value) -> Option<Value> {
    match value {
        Value::Object(map) if !map.is_empty() => Some(value.clone()),
        _ => None,
    }
}

/// The text handed back to models that take a single string per result:
/// the first content block, rendered as text.
pub fn result_text(result: &CallToolResult) -> String {
    result
        .content
        .first()
        .map(|block| block.to_display_text())
        .unwrap_or_default()
}

/// What one dispatched call produced, in the form the loops feed back.
pub(crate) fn outcome_text(outcome: &Result<CallToolResult, ToolDispatchError>) -> String {
    match outcome {
        Ok(result) => result_text(result),
        Err(e) => e.inline(),
    }
}

//! Tool naming and filtering.
//!
//! Tools from every provider share one namespace. A tool is exposed to the
//! model as `"{provider}-{tool}"` and routed back by splitting on the first
//! `-`. Provider names cannot contain `-`, so the split is unambiguous even
//! when the raw tool name contains one.

use std::collections::BTreeSet;

use conduit_core::ServerConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::McpToolDefinition;

/// Separator between provider and tool in a qualified name.
pub const NAME_SEPARATOR: char = '-';

/// Build the qualified name of `tool` on `provider`.
pub fn qualify(provider: &str, tool: &str) -> String {
    format!("{}{}{}", provider, NAME_SEPARATOR, tool)
}

/// Split a qualified name into `(provider, tool)`.
///
/// Returns None if there is no separator or either side is empty.
pub fn split_qualified(name: &str) -> Option<(&str, &str)> {
    match name.split_once(NAME_SEPARATOR) {
        Some((provider, tool)) if !provider.is_empty() && !tool.is_empty() => {
            Some((provider, tool))
        }
        _ => None,
    }
}

/// Per-provider allow and deny lists over raw tool names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolFilter {
    allowed: BTreeSet<String>,
    denied: BTreeSet<String>,
}

impl ToolFilter {
    /// Create a filter. An empty allow-list admits every tool.
    pub fn new(allowed: BTreeSet<String>, denied: BTreeSet<String>) -> Self {
        Self { allowed, denied }
    }

    /// The filter declared in a provider's configuration.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.allowed_tools.clone(), config.denied_tools.clone())
    }

    /// Whether `tool` survives the allow-list, then the deny-list.
    pub fn permits(&self, tool: &str) -> bool {
        (self.allowed.is_empty() || self.allowed.contains(tool)) && !self.denied.contains(tool)
    }
}

/// A provider tool under its qualified name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub provider: String,
    /// Name on the provider.
    pub tool: String,
    /// Name shown to the model.
    pub qualified_name: String,
    pub description: String,
    /// Passed through verbatim.
    pub input_schema: Value,
}

impl ToolDescriptor {
    /// Describe `definition` as served by `provider`.
    pub fn new(provider: &str, definition: McpToolDefinition) -> Self {
        Self {
            qualified_name: qualify(provider, &definition.name),
            provider: provider.to_string(),
            tool: definition.name,
            description: definition.description.unwrap_or_default(),
            input_schema: definition.input_schema,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_qualify_then_split() {
        for (provider, tool) in [
            ("weather", "get_forecast"),
            ("fs", "read-file"),
            ("a_b", "x-y-z"),
        ] {
            let name = qualify(provider, tool);
            assert_eq!(split_qualified(&name), Some((provider, tool)));
        }
    }

    #[test]
    fn test_split_invalid_names() {
        assert_eq!(split_qualified("get_forecast"), None);
        assert_eq!(split_qualified("-get_forecast"), None);
        assert_eq!(split_qualified("weather-"), None);
        assert_eq!(split_qualified(""), None);
    }

    #[test]
    fn test_empty_filter_permits_all() {
        let filter = ToolFilter::default();
        assert!(filter.permits("anything"));
    }

    #[test]
    fn test_allow_list_restricts() {
        let filter = ToolFilter::new(set(&["get_alerts"]), BTreeSet::new());
        assert!(filter.permits("get_alerts"));
        assert!(!filter.permits("get_forecast"));
    }

    #[test]
    fn test_deny_wins_over_allow() {
        let filter = ToolFilter::new(set(&["get_alerts", "get_forecast"]), set(&["get_alerts"]));
        assert!(!filter.permits("get_alerts"));
        assert!(filter.permits("get_forecast"));
    }

    #[test]
    fn test_descriptor_from_definition() {
        let descriptor = ToolDescriptor::new(
            "weather",
            McpToolDefinition {
                name: "get_alerts".to_string(),
                description: None,
                input_schema: json!({"type": "object", "properties": {"state": {"type": "string"}}}),
            },
        );
        assert_eq!(descriptor.qualified_name, "weather-get_alerts");
        assert_eq!(descriptor.description, "");
        assert_eq!(descriptor.input_schema["properties"]["state"]["type"], "string");
    }
}

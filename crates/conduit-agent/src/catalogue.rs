//! Translation of the merged tool catalogue into each vendor's tool shape.

use conduit_core::VendorKind;
use conduit_mcp::ToolDescriptor;
use conduit_vendors::anthropic::AnthropicTool;
use conduit_vendors::gemini::{function_parameters, FunctionDeclaration, GeminiTool};
use conduit_vendors::openai::OpenAiTool;

use crate::dispatch::ToolRouter;

/// A vendor's wire representation of one tool.
pub trait VendorTool: Sized {
    const VENDOR: VendorKind;

    fn from_descriptor(descriptor: &ToolDescriptor) -> Self;
}

impl VendorTool for AnthropicTool {
    const VENDOR: VendorKind = VendorKind::Anthropic;

    fn from_descriptor(descriptor: &ToolDescriptor) -> Self {
        AnthropicTool {
            name: descriptor.qualified_name.clone(),
            description: descriptor.description.clone(),
            input_schema: descriptor.input_schema.clone(),
        }
    }
}

impl VendorTool for OpenAiTool {
    const VENDOR: VendorKind = VendorKind::OpenAi;

    fn from_descriptor(descriptor: &ToolDescriptor) -> Self {
        OpenAiTool::function(
            descriptor.qualified_name.clone(),
            descriptor.description.clone(),
            descriptor.input_schema.clone(),
        )
    }
}

/// One declaration wrapper per tool.
impl VendorTool for GeminiTool {
    const VENDOR: VendorKind = VendorKind::Google;

    fn from_descriptor(descriptor: &ToolDescriptor) -> Self {
        GeminiTool {
            function_declarations: vec![FunctionDeclaration {
                name: descriptor.qualified_name.clone(),
                description: descriptor.description.clone(),
                parameters: function_parameters(&descriptor.input_schema),
            }],
        }
    }
}

/// Translate descriptors, preserving their order.
pub fn translate<T: VendorTool>(descriptors: &[ToolDescriptor]) -> Vec<T> {
    descriptors.iter().map(T::from_descriptor).collect()
}

/// Fetch the current catalogue and translate it for vendor `T`.
///
/// Nothing is cached; every call asks the providers again.
pub async fn build_catalogue<T: VendorTool>(router: &dyn ToolRouter) -> Vec<T> {
    let descriptors = router.descriptors().await;
    tracing::debug!(vendor = T::VENDOR.as_str(), tools = descriptors.len(), "Built tool catalogue");
    translate(&descriptors)
}

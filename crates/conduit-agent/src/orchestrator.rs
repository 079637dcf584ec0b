//! The common contract of the vendor loops and the factory choosing one.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::{Settings, VendorKind};
use conduit_vendors::{AnthropicClient, GeminiClient, OpenAiClient, VendorError};
use tracing::info;

use crate::anthropic::AnthropicLoop;
use crate::dispatch::ToolRouter;
use crate::error::TurnError;
use crate::gemini::GeminiLoop;
use crate::openai::OpenAiLoop;

/// Drives one vendor's request, tool-call, re-request cycle.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    fn vendor(&self) -> VendorKind;

    /// Run one query to its final answer.
    ///
    /// Tool failures are folded into the answer; only upstream failures and
    /// the round limit end the turn with an error.
    async fn process_query(&self, query: &str) -> Result<String, TurnError>;
}

/// Per-request knobs shared by every loop.
#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub model: String,
    pub max_tokens: u32,
    /// `None` when the configured prompt is blank.
    pub system_prompt: Option<String>,
    pub max_rounds: usize,
}

impl LoopOptions {
    pub fn from_settings(settings: &Settings, vendor: VendorKind) -> Self {
        let prompt = settings.system_prompt.trim();
        Self {
            model: settings.model(vendor).to_string(),
            max_tokens: settings.max_tokens,
            system_prompt: (!prompt.is_empty()).then(|| prompt.to_string()),
            max_rounds: settings.max_tool_rounds,
        }
    }
}

/// Build the loop for the configured vendor, with a live HTTP client.
pub fn build_orchestrator(
    settings: &Settings,
    router: Arc<dyn ToolRouter>,
) -> Result<Box<dyn Orchestrator>, VendorError> {
    let vendor = settings.vendor;
    let api_key = settings
        .api_key(vendor)
        .ok_or(VendorError::MissingApiKey(vendor))?;
    let endpoint = settings.endpoint(vendor);
    let options = LoopOptions::from_settings(settings, vendor);

    info!(vendor = %vendor, model = %options.model, "Using model");

    let orchestrator: Box<dyn Orchestrator> = match vendor {
        VendorKind::Anthropic => {
            let mut client = AnthropicClient::new(api_key)?;
            if let Some(url) = endpoint {
                client = client.with_base_url(url);
            }
            Box::new(AnthropicLoop::new(Arc::new(client), router, options))
        }
        VendorKind::OpenAi => {
            let mut client = OpenAiClient::new(api_key)?;
            if let Some(url) = endpoint {
                client = client.with_base_url(url);
            }
            Box::new(OpenAiLoop::new(Arc::new(client), router, options))
        }
        VendorKind::Google => {
            let mut client = GeminiClient::new(api_key)?;
            if let Some(url) = endpoint {
                client = client.with_base_url(url);
            }
            Box::new(GeminiLoop::new(Arc::new(client), router, options))
        }
    };

    Ok(orchestrator)
}

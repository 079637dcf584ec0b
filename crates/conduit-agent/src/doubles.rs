//! Scripted vendor clients and a scripted provider setup for loop tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use conduit_core::VendorKind;
use conduit_mcp::testing::{MockConnector, ScriptedProvider};
use conduit_mcp::SessionRegistry;
use conduit_vendors::anthropic::{MessagesRequest, MessagesResponse};
use conduit_vendors::gemini::{ChunkStream, GenerateContentRequest, GenerateContentResponse};
use conduit_vendors::openai::{ChatRequest, ChatResponse};
use conduit_vendors::{ChatCompletionsApi, GenerateContentApi, MessagesApi, VendorError};
use futures::stream;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::orchestrator::LoopOptions;

/// Replays canned replies in order and records every request.
pub struct Scripted<Req, Reply> {
    replies: Mutex<VecDeque<Result<Reply, VendorError>>>,
    requests: Mutex<Vec<Req>>,
    vendor: VendorKind,
}

impl<Req: Clone, Reply> Scripted<Req, Reply> {
    pub fn new(vendor: VendorKind) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            vendor,
        }
    }

    pub fn reply(self, reply: Reply) -> Self {
        self.replies.lock().unwrap().push_back(Ok(reply));
        self
    }

    pub fn fail(self, error: VendorError) -> Self {
        self.replies.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn requests(&self) -> Vec<Req> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: &Req) -> Result<Reply, VendorError> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(VendorError::api(self.vendor, 500, "no scripted reply")))
    }
}

pub fn parse<T: DeserializeOwned>(value: Value) -> T {
    serde_json::from_value(value).unwrap()
}

pub type ScriptedMessages = Scripted<MessagesRequest, MessagesResponse>;
pub type ScriptedChat = Scripted<ChatRequest, ChatResponse>;
/// Each reply is the full list of chunks of one stream.
pub type ScriptedGemini =
    Scripted<GenerateContentRequest, Vec<Result<GenerateContentResponse, VendorError>>>;

#[async_trait]
impl MessagesApi for ScriptedMessages {
    async fn create_message(&self, request: &MessagesRequest) -> Result<MessagesResponse, VendorError> {
        self.next(request)
    }
}

#[async_trait]
impl ChatCompletionsApi for ScriptedChat {
    async fn create_chat_completion(&self, request: &ChatRequest) -> Result<ChatResponse, VendorError> {
        self.next(request)
    }
}

#[async_trait]
impl GenerateContentApi for ScriptedGemini {
    async fn stream_generate_content(
        &self,
        request: &GenerateContentRequest,
    ) -> Result<ChunkStream, VendorError> {
        let chunks = self.next(request)?;
        Ok(Box::pin(stream::iter(chunks)))
    }
}

/// A registry holding one `weather` provider with two tools.
pub async fn weather_registry() -> (Arc<SessionRegistry>, ScriptedProvider) {
    let provider = ScriptedProvider::new("weather")
        .with_tool("get_forecast", "Get the forecast for a location")
        .with_tool("get_alerts", "Get weather alerts for a US state")
        .with_result("get_alerts", "No active alerts")
        .with_result("get_forecast", "Sunny, 25C");
    let configs = SessionRegistry::load_config(
        r#"{"mcpServers": {"weather": {"type": "sse", "url": "http://localhost:8000/sse"}}}"#,
    )
    .unwrap();
    let mut registry =
        SessionRegistry::with_connector(Arc::new(MockConnector::new().with_provider(provider.clone())));
    registry.create_sessions(&configs).await;
    (Arc::new(registry), provider)
}

pub fn options(max_rounds: usize) -> LoopOptions {
    LoopOptions {
        model: "test-model".to_string(),
        max_tokens: 1000,
        system_prompt: Some("You are a helpful assistant.".to_string()),
        max_rounds,
    }
}

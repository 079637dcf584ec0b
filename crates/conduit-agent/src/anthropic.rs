//! Tool-use loop for the Anthropic Messages API.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::VendorKind;
use conduit_mcp::{CallToolResult, ToolContent};
use conduit_vendors::anthropic::{
    AnthropicMessage, AnthropicTool, ContentBlock, ImageSource, MessagesRequest,
};
use conduit_vendors::MessagesApi;
use tracing::debug;

use crate::catalogue::build_catalogue;
use crate::dispatch::{object_arguments, ToolRouter};
use crate::error::{ToolDispatchError, TurnError};
use crate::orchestrator::{LoopOptions, Orchestrator};
use crate::turn::ConversationTurn;

pub struct AnthropicLoop {
    api: Arc<dyn MessagesApi>,
    router: Arc<dyn ToolRouter>,
    options: LoopOptions,
}

impl AnthropicLoop {
    pub fn new(api: Arc<dyn MessagesApi>, router: Arc<dyn ToolRouter>, options: LoopOptions) -> Self {
        Self {
            api,
            router,
            options,
        }
    }
}

#[async_trait]
impl Orchestrator for AnthropicLoop {
    fn vendor(&self) -> VendorKind {
        VendorKind::Anthropic
    }

    async fn process_query(&self, query: &str) -> Result<String, TurnError> {
        let tools = build_catalogue::<AnthropicTool>(self.router.as_ref()).await;
        let mut turn = ConversationTurn::new(
            vec![AnthropicMessage::user_text(query)],
            self.options.max_rounds,
        );

        loop {
            let round = turn.next_round()?;
            let request = MessagesRequest {
                model: self.options.model.clone(),
                max_tokens: self.options.max_tokens,
                system: self.options.system_prompt.clone(),
                messages: turn.messages().to_vec(),
                tools: tools.clone(),
            };
            let response = self.api.create_message(&request).await?;
            debug!(round, stop_reason = ?response.stop_reason, "Anthropic reply");

            // Every tool use in this reply must be answered in the next message.
            let mut results = Vec::new();
            for block in &response.content {
                match block {
                    ContentBlock::Text { text } => turn.note_text(text.as_str()),
                    ContentBlock::ToolUse { id, name, input } => {
                        turn.note_call(name, input);
                        let outcome = self.router.dispatch(name, object_arguments(input)).await;
                        if let Err(e) = &outcome {
                            turn.note_text(e.inline());
                        }
                        results.push(tool_result(id, outcome));
                    }
                    _ => {}
                }
            }

            if results.is_empty() {
                return Ok(turn.finish());
            }

            let echoed = response
                .content
                .into_iter()
                .filter(|block| !matches!(block, ContentBlock::Unsupported))
                .collect();
            turn.push(AnthropicMessage::assistant(echoed));
            turn.push(AnthropicMessage::user(results));
        }
    }
}

fn tool_result(tool_use_id: &str, outcome: Result<CallToolResult, ToolDispatchError>) -> ContentBlock {
    let (content, is_error) = match outcome {
        Ok(result) => (
            result.content.iter().map(result_block).collect(),
            result.is_error,
        ),
        Err(e) => (vec![ContentBlock::text(e.inline())], true),
    };

    ContentBlock::ToolResult {
        tool_use_id: tool_use_id.to_string(),
        content,
        is_error,
    }
}

/// Text and images pass through; anything else goes over as text.
fn result_block(content: &ToolContent) -> ContentBlock {
    match content {
        ToolContent::Text { text } => ContentBlock::text(text.as_str()),
        ToolContent::Image { data, mime_type } => ContentBlock::Image {
            source: ImageSource::base64(mime_type.as_str(), data.as_str()),
        },
        other => ContentBlock::text(other.to_display_text()),
    }
}

#[cfg(test)]
mod tests {
    use conduit_vendors::anthropic::MessagesResponse;
    use conduit_vendors::VendorError;
    use serde_json::json;

    use super::*;
    use crate::doubles::{options, parse, weather_registry, ScriptedMessages};

    fn text_reply(text: &str) -> MessagesResponse {
        parse(json!({
            "content": [{"type": "text", "text": text}],
            "stop_reason": "end_turn"
        }))
    }

    fn tool_reply(calls: &[(&str, &str, serde_json::Value)]) -> MessagesResponse {
        let mut content = vec![json!({"type": "text", "text": "Let me check."})];
        content.extend(calls.iter().map(|(id, name, input)| {
            json!({"type": "tool_use", "id": id, "name": name, "input": input})
        }));
        parse(json!({"content": content, "stop_reason": "tool_use"}))
    }

    #[tokio::test]
    async fn test_one_tool_call_takes_two_requests() {
        let (registry, provider) = weather_registry().await;
        let api = Arc::new(
            ScriptedMessages::new(VendorKind::Anthropic)
                .reply(tool_reply(&[("toolu_1", "weather-get_alerts", json!({"state": "CA"}))]))
                .reply(text_reply("There are no active alerts in California.")),
        );
        let agent = AnthropicLoop::new(api.clone(), registry, options(20));

        let answer = agent.process_query("Any weather alerts in CA?").await.unwrap();

        assert_eq!(
            answer,
            "Let me check.\n[Calling tool weather-get_alerts with args {\"state\":\"CA\"}]\nThere are no active alerts in California."
        );
        assert_eq!(
            provider.calls(),
            vec![("get_alerts".to_string(), Some(json!({"state": "CA"})))]
        );

        let requests = api.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tools.len(), 2);
        assert_eq!(requests[0].system.as_deref(), Some("You are a helpful assistant."));

        let followup = serde_json::to_value(&requests[1].messages).unwrap();
        assert_eq!(followup.as_array().unwrap().len(), 3);
        assert_eq!(followup[1]["role"], "assistant");
        assert_eq!(followup[2]["role"], "user");
        assert_eq!(followup[2]["content"][0]["type"], "tool_result");
        assert_eq!(followup[2]["content"][0]["tool_use_id"], "toolu_1");
        assert_eq!(followup[2]["content"][0]["content"][0]["text"], "No active alerts");
    }

    #[tokio::test]
    async fn test_parallel_tool_uses_answered_together() {
        let (registry, provider) = weather_registry().await;
        let api = Arc::new(
            ScriptedMessages::new(VendorKind::Anthropic)
                .reply(tool_reply(&[
                    ("toolu_1", "weather-get_alerts", json!({"state": "CA"})),
                    ("toolu_2", "weather-get_forecast", json!({"latitude": 38.5, "longitude": -121.5})),
                ]))
                .reply(text_reply("Done.")),
        );
        let agent = AnthropicLoop::new(api.clone(), registry, options(20));

        agent.process_query("Weather in Sacramento?").await.unwrap();

        assert_eq!(provider.calls().len(), 2);
        let requests = api.requests();
        assert_eq!(requests.len(), 2);
        let results = &requests[1].messages[2].content;
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_reported_inline() {
        let (registry, _) = weather_registry().await;
        let api = Arc::new(
            ScriptedMessages::new(VendorKind::Anthropic)
                .reply(tool_reply(&[("toolu_1", "ghost-get_alerts", json!({}))]))
                .reply(text_reply("Sorry, that tool is unavailable.")),
        );
        let agent = AnthropicLoop::new(api.clone(), registry, options(20));

        let answer = agent.process_query("Alerts?").await.unwrap();

        assert!(answer.contains("[tool error: unknown provider 'ghost']"));
        assert!(answer.ends_with("Sorry, that tool is unavailable."));

        let followup = serde_json::to_value(&api.requests()[1].messages[2]).unwrap();
        assert_eq!(followup["content"][0]["is_error"], true);
    }

    #[tokio::test]
    async fn test_upstream_error_is_fatal() {
        let (registry, _) = weather_registry().await;
        let api = Arc::new(
            ScriptedMessages::new(VendorKind::Anthropic)
                .fail(VendorError::api(VendorKind::Anthropic, 401, "invalid x-api-key")),
        );
        let agent = AnthropicLoop::new(api, registry, options(20));

        let err = agent.process_query("hi").await.unwrap_err();
        assert!(matches!(err, TurnError::Upstream(VendorError::Api { status: 401, .. })));
    }

    #[tokio::test]
    async fn test_round_limit_stops_runaway_loop() {
        let (registry, _) = weather_registry().await;
        let call = || tool_reply(&[("toolu", "weather-get_alerts", json!({"state": "CA"}))]);
        let api = Arc::new(
            ScriptedMessages::new(VendorKind::Anthropic)
                .reply(call())
                .reply(call())
                .reply(call()),
        );
        let agent = AnthropicLoop::new(api.clone(), registry, options(2));

        let err = agent.process_query("loop").await.unwrap_err();
        assert!(matches!(err, TurnError::RoundLimit(2)));
        assert_eq!(api.requests().len(), 2);
    }

    #[test]
    fn test_image_results_pass_through() {
        let result = CallToolResult {
            content: vec![ToolContent::Image {
                data: "aGk=".to_string(),
                mime_type: "image/png".to_string(),
            }],
            structured_content: None,
            is_error: false,
        };
        let value = serde_json::to_value(tool_result("toolu_1", Ok(result))).unwrap();
        assert_eq!(value["content"][0]["type"], "image");
        assert_eq!(value["content"][0]["source"]["media_type"], "image/png");
    }
}

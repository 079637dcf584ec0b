//! Tool-calling loop for the OpenAI Chat Completions API.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::VendorKind;
use conduit_vendors::openai::{ChatMessage, ChatRequest, OpenAiTool};
use conduit_vendors::ChatCompletionsApi;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::catalogue::build_catalogue;
use crate::dispatch::{outcome_text, parse_arguments, ToolRouter};
use crate::error::TurnError;
use crate::orchestrator::{LoopOptions, Orchestrator};
use crate::turn::ConversationTurn;

const FINISH_TOOL_CALLS: &str = "tool_calls";
const FINISH_STOP: &str = "stop";

pub struct OpenAiLoop {
    api: Arc<dyn ChatCompletionsApi>,
    router: Arc<dyn ToolRouter>,
    options: LoopOptions,
}

impl OpenAiLoop {
    pub fn new(
        api: Arc<dyn ChatCompletionsApi>,
        router: Arc<dyn ToolRouter>,
        options: LoopOptions,
    ) -> Self {
        Self {
            api,
            router,
            options,
        }
    }

    fn initial_messages(&self, query: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(prompt) = &self.options.system_prompt {
            messages.push(ChatMessage::system(prompt.as_str()));
        }
        messages.push(ChatMessage::user(query));
        messages
    }
}

#[async_trait]
impl Orchestrator for OpenAiLoop {
    fn vendor(&self) -> VendorKind {
        VendorKind::OpenAi
    }

    async fn process_query(&self, query: &str) -> Result<String, TurnError> {
        let tools = build_catalogue::<OpenAiTool>(self.router.as_ref()).await;
        let tool_choice = (!tools.is_empty()).then(|| "auto".to_string());
        let mut turn = ConversationTurn::new(self.initial_messages(query), self.options.max_rounds);

        loop {
            let round = turn.next_round()?;
            let request = ChatRequest {
                model: self.options.model.clone(),
                messages: turn.messages().to_vec(),
                tools: tools.clone(),
                tool_choice: tool_choice.clone(),
                max_tokens: Some(self.options.max_tokens),
            };
            let response = self.api.create_chat_completion(&request).await?;
            let choice = response
                .choices
                .into_iter()
                .next()
                .ok_or(TurnError::EmptyResponse(VendorKind::OpenAi))?;
            let reason = choice.finish_reason.as_deref().unwrap_or_default();
            debug!(round, finish_reason = reason, "OpenAI reply");

            let message = choice.message;
            if reason != FINISH_TOOL_CALLS || message.tool_calls.is_empty() {
                if reason != FINISH_STOP {
                    warn!(finish_reason = reason, "Turn ended without a stop");
                }
                turn.note_text(message.content.unwrap_or_default());
                return Ok(turn.finish());
            }

            if let Some(text) = &message.content {
                turn.note_text(text.as_str());
            }
            let calls = message.tool_calls.clone();
            turn.push(ChatMessage {
                content: message.content,
                ..ChatMessage::assistant_tool_calls(message.tool_calls)
            });

            for call in calls {
                let name = &call.function.name;
                let outcome = match parse_arguments(name, &call.function.arguments) {
                    Ok(arguments) => {
                        turn.note_call(name, arguments.as_ref().unwrap_or(&json!({})));
                        self.router.dispatch(name, arguments).await
                    }
                    Err(e) => {
                        turn.note_call(name, &Value::String(call.function.arguments.clone()));
                        Err(e)
                    }
                };
                if let Err(e) = &outcome {
                    turn.note_text(e.inline());
                }
                turn.push(ChatMessage::tool(call.id, outcome_text(&outcome)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use conduit_vendors::openai::ChatResponse;
    use serde_json::json;

    use super::*;
    use crate::doubles::{options, parse, weather_registry, ScriptedChat};

    fn tool_calls(calls: &[(&str, &str, &str)]) -> ChatResponse {
        let calls: Vec<_> = calls
            .iter()
            .map(|(id, name, arguments)| {
                json!({"id": id, "type": "function", "function": {"name": name, "arguments": arguments}})
            })
            .collect();
        parse(json!({
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": null, "tool_calls": calls},
                "finish_reason": "tool_calls"
            }]
        }))
    }

    fn finished(content: &str, reason: &str) -> ChatResponse {
        parse(json!({
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": reason
            }]
        }))
    }

    #[tokio::test]
    async fn test_tool_calls_then_stop() {
        let (registry, provider) = weather_registry().await;
        let api = Arc::new(
            ScriptedChat::new(VendorKind::OpenAi)
                .reply(tool_calls(&[("call_1", "weather-get_alerts", r#"{"state":"CA"}"#)]))
                .reply(finished("No alerts in California.", "stop")),
        );
        let agent = OpenAiLoop::new(api.clone(), registry, options(20));

        let answer = agent.process_query("Alerts in CA?").await.unwrap();

        assert_eq!(
            answer,
            "[Calling tool weather-get_alerts with args {\"state\":\"CA\"}]\nNo alerts in California."
        );
        assert_eq!(provider.calls().len(), 1);

        let requests = api.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tool_choice.as_deref(), Some("auto"));
        assert_eq!(requests[0].max_tokens, Some(1000));
        assert_eq!(requests[0].messages[0].role, "system");

        let followup = &requests[1].messages;
        assert_eq!(followup.len(), 4);
        assert_eq!(followup[2].tool_calls[0].id, "call_1");
        assert_eq!(followup[3].role, "tool");
        assert_eq!(followup[3].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(followup[3].content.as_deref(), Some("No active alerts"));
    }

    #[tokio::test]
    async fn test_bad_arguments_are_reported_to_model() {
        let (registry, provider) = weather_registry().await;
        let api = Arc::new(
            ScriptedChat::new(VendorKind::OpenAi)
                .reply(tool_calls(&[("call_1", "weather-get_alerts", "{state")]))
                .reply(finished("I could not check.", "stop")),
        );
        let agent = OpenAiLoop::new(api.clone(), registry, options(20));

        let answer = agent.process_query("Alerts?").await.unwrap();

        assert!(answer.contains("[tool error: invalid arguments for 'weather-get_alerts'"));
        assert!(provider.calls().is_empty());
        let tool_message = &api.requests()[1].messages[3];
        assert!(tool_message.content.as_deref().unwrap().starts_with("[tool error: "));
    }

    #[tokio::test]
    async fn test_length_finish_ends_turn() {
        let (registry, _) = weather_registry().await;
        let api = Arc::new(ScriptedChat::new(VendorKind::OpenAi).reply(finished("Partial answ", "length")));
        let agent = OpenAiLoop::new(api.clone(), registry, options(20));

        assert_eq!(agent.process_query("Long story?").await.unwrap(), "Partial answ");
        assert_eq!(api.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_no_choices_is_an_error() {
        let (registry, _) = weather_registry().await;
        let api = Arc::new(ScriptedChat::new(VendorKind::OpenAi).reply(parse(json!({"choices": []}))));
        let agent = OpenAiLoop::new(api, registry, options(20));

        let err = agent.process_query("hi").await.unwrap_err();
        assert!(matches!(err, TurnError::EmptyResponse(VendorKind::OpenAi)));
    }
}

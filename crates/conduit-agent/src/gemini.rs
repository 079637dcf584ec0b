//! Function-calling loop over the Gemini streaming API.
//!
//! Each round opens a stream and drains it completely: visible text is
//! gathered as it arrives and every function call in the stream is served,
//! including calls that come after text. A round whose stream carries no
//! function calls finishes the turn.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::VendorKind;
use conduit_vendors::gemini::{
    Content, FunctionCall, FunctionResponse, GeminiTool, GenerateContentRequest, GenerationConfig,
    Part,
};
use conduit_vendors::GenerateContentApi;
use futures::StreamExt;
use serde_json::json;
use tracing::debug;

use crate::catalogue::build_catalogue;
use crate::dispatch::{object_arguments, outcome_text, ToolRouter};
use crate::error::TurnError;
use crate::orchestrator::{LoopOptions, Orchestrator};
use crate::turn::ConversationTurn;

pub struct GeminiLoop {
    api: Arc<dyn GenerateContentApi>,
    router: Arc<dyn ToolRouter>,
    options: LoopOptions,
}

/// What one drained stream produced.
#[derive(Default)]
struct RoundOutput {
    text: String,
    parts: Vec<Part>,
    calls: Vec<FunctionCall>,
}

impl GeminiLoop {
    pub fn new(
        api: Arc<dyn GenerateContentApi>,
        router: Arc<dyn ToolRouter>,
        options: LoopOptions,
    ) -> Self {
        Self {
            api,
            router,
            options,
        }
    }

    async fn run_round(&self, request: &GenerateContentRequest) -> Result<RoundOutput, TurnError> {
        let mut stream = self.api.stream_generate_content(request).await?;
        let mut output = RoundOutput::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if let Some(text) = chunk.text() {
                output.text.push_str(&text);
            }
            output.calls.extend(chunk.function_calls().into_iter().cloned());
            output.parts.extend_from_slice(chunk.parts());
        }

        Ok(output)
    }
}

#[async_trait]
impl Orchestrator for GeminiLoop {
    fn vendor(&self) -> VendorKind {
        VendorKind::Google
    }

    async fn process_query(&self, query: &str) -> Result<String, TurnError> {
        let tools = build_catalogue::<GeminiTool>(self.router.as_ref()).await;
        let mut turn = ConversationTurn::new(vec![Content::user_text(query)], self.options.max_rounds);

        loop {
            let round = turn.next_round()?;
            let request = GenerateContentRequest {
                model: self.options.model.clone(),
                contents: turn.messages().to_vec(),
                system_instruction: self.options.system_prompt.as_deref().map(Content::instruction),
                tools: tools.clone(),
                generation_config: Some(GenerationConfig {
                    max_output_tokens: Some(self.options.max_tokens),
                }),
            };
            let output = self.run_round(&request).await?;
            debug!(round, calls = output.calls.len(), "Gemini stream drained");

            turn.note_text(output.text);
            if output.calls.is_empty() {
                return Ok(turn.finish());
            }

            turn.push(Content::model(output.parts));

            let mut responses = Vec::with_capacity(output.calls.len());
            for call in output.calls {
                turn.note_call(&call.name, &call.args);
                let outcome = self
                    .router
                    .dispatch(&call.name, object_arguments(&call.args))
                    .await;
                if let Err(e) = &outcome {
                    turn.note_text(e.inline());
                }
                responses.push(Part::function_response(FunctionResponse {
                    id: call.id,
                    name: call.name,
                    response: json!({ "result": outcome_text(&outcome) }),
                }));
            }
            turn.push(Content::user(responses));
        }
    }
}

#[cfg(test)]
mod tests {
    use conduit_vendors::gemini::GenerateContentResponse;
    use conduit_vendors::VendorError;
    use serde_json::Value;

    use super::*;
    use crate::doubles::{options, parse, weather_registry, ScriptedGemini};

    fn chunk(parts: Value) -> Result<GenerateContentResponse, VendorError> {
        Ok(parse(json!({"candidates": [{"content": {"role": "model", "parts": parts}}]})))
    }

    fn text(text: &str) -> Result<GenerateContentResponse, VendorError> {
        chunk(json!([{"text": text}]))
    }

    fn call(name: &str, args: Value) -> Result<GenerateContentResponse, VendorError> {
        chunk(json!([{"functionCall": {"name": name, "args": args}}]))
    }

    #[tokio::test]
    async fn test_function_call_round_trip() {
        let (registry, provider) = weather_registry().await;
        let api = Arc::new(
            ScriptedGemini::new(VendorKind::Google)
                .reply(vec![call("weather-get_alerts", json!({"state": "CA"}))])
                .reply(vec![text("No active "), text("alerts.")]),
        );
        let agent = GeminiLoop::new(api.clone(), registry, options(20));

        let answer = agent.process_query("Alerts in CA?").await.unwrap();

        assert_eq!(
            answer,
            "[Calling tool weather-get_alerts with args {\"state\":\"CA\"}]\nNo active alerts."
        );
        assert_eq!(provider.calls().len(), 1);

        let requests = api.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tools.len(), 2);
        assert!(requests[0].system_instruction.is_some());

        let body = serde_json::to_value(&requests[1]).unwrap();
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["parts"][0]["functionResponse"]["name"], "weather-get_alerts");
        assert_eq!(
            contents[2]["parts"][0]["functionResponse"]["response"]["result"],
            "No active alerts"
        );
    }

    #[tokio::test]
    async fn test_calls_after_text_are_still_served() {
        let (registry, provider) = weather_registry().await;
        let api = Arc::new(
            ScriptedGemini::new(VendorKind::Google)
                .reply(vec![
                    text("Checking both."),
                    call("weather-get_alerts", json!({"state": "CA"})),
                    call("weather-get_forecast", json!({"latitude": 38.5, "longitude": -121.5})),
                ])
                .reply(vec![text("All clear and sunny.")]),
        );
        let agent = GeminiLoop::new(api.clone(), registry, options(20));

        let answer = agent.process_query("Weather?").await.unwrap();

        assert!(answer.starts_with("Checking both."));
        assert!(answer.ends_with("All clear and sunny."));
        assert_eq!(provider.calls().len(), 2);

        let second = &api.requests()[1];
        assert_eq!(second.contents[2].parts.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_reported_inline() {
        let (registry, _) = weather_registry().await;
        let api = Arc::new(
            ScriptedGemini::new(VendorKind::Google)
                .reply(vec![call("ghost-lookup", json!({}))])
                .reply(vec![text("That tool is missing.")]),
        );
        let agent = GeminiLoop::new(api, registry, options(20));

        let answer = agent.process_query("?").await.unwrap();
        assert!(answer.contains("[tool error: unknown provider 'ghost']"));
    }

    #[tokio::test]
    async fn test_stream_error_is_fatal() {
        let (registry, _) = weather_registry().await;
        let api = Arc::new(ScriptedGemini::new(VendorKind::Google).reply(vec![
            text("Partial"),
            Err(VendorError::stream(VendorKind::Google, "quota exceeded")),
        ]));
        let agent = GeminiLoop::new(api, registry, options(20));

        let err = agent.process_query("?").await.unwrap_err();
        assert!(matches!(err, TurnError::Upstream(VendorError::Stream { .. })));
    }
}

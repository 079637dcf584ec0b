//! Google Gemini `streamGenerateContent` client.
//!
//! Replies arrive as an SSE stream (`alt=sse`) where every `data:` payload is
//! a complete `GenerateContentResponse` chunk.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use conduit_core::sse::SseParser;
use conduit_core::VendorKind;
use futures::{stream, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::error::VendorError;
use crate::http;

/// Gemini API base URL.
pub const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default bound on the gap between two stream reads.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Schema keywords the Gemini API rejects in function parameters.
const UNSUPPORTED_SCHEMA_KEYS: &[&str] = &["$schema", "$id", "additionalProperties", "default", "examples"];

/// A stream of reply chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<GenerateContentResponse, VendorError>> + Send>>;

/// Function declarations wrapper; the host emits one per tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiTool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: Value,
}

/// One part of a content entry.
///
/// Fields this client does not model (such as `thoughtSignature`) are kept
/// so model turns can be echoed back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn function_response(response: FunctionResponse) -> Self {
        Self {
            function_response: Some(response),
            ..Self::default()
        }
    }

    /// Visible text, excluding thought summaries.
    pub fn visible_text(&self) -> Option<&str> {
        match self.thought {
            Some(true) => None,
            _ => self.text.as_deref(),
        }
    }
}

/// A role-tagged list of parts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Some("user".to_string()),
            parts,
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::user(vec![Part::text(text)])
    }

    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            role: Some("model".to_string()),
            parts,
        }
    }

    /// Role-less content, as used for the system instruction.
    pub fn instruction(text: impl Into<String>) -> Self {
        Self {
            role: None,
            parts: vec![Part::text(text)],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

/// Body of `POST models/{model}:streamGenerateContent`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    /// Goes into the URL, not the body.
    #[serde(skip)]
    pub model: String,
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<GeminiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

/// One streamed reply chunk.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Parts of the first candidate.
    pub fn parts(&self) -> &[Part] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or_default()
    }

    /// Visible text of this chunk, if any.
    pub fn text(&self) -> Option<String> {
        let text: String = self.parts().iter().filter_map(Part::visible_text).collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.parts()
            .iter()
            .filter_map(|p| p.function_call.as_ref())
            .collect()
    }
}

/// Strip schema keywords Gemini does not accept, recursively.
///
/// Property names under `properties` are never touched.
pub fn function_parameters(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, value) in map {
                if UNSUPPORTED_SCHEMA_KEYS.contains(&key.as_str()) {
                    continue;
                }
                let value = match (key.as_str(), value) {
                    ("properties", Value::Object(props)) => Value::Object(
                        props
                            .iter()
                            .map(|(name, prop)| (name.clone(), function_parameters(prop)))
                            .collect(),
                    ),
                    ("enum" | "required", other) => other.clone(),
                    (_, other) => function_parameters(other),
                };
                out.insert(key.clone(), value);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(function_parameters).collect()),
        other => other.clone(),
    }
}

/// The one Gemini operation the host needs.
#[async_trait]
pub trait GenerateContentApi: Send + Sync {
    async fn stream_generate_content(
        &self,
        request: &GenerateContentRequest,
    ) -> Result<ChunkStream, VendorError>;
}

/// HTTP client for the Gemini API.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    read_timeout: Duration,
}

impl GeminiClient {
    /// Create a new Gemini client.
    pub fn new(api_key: impl Into<String>) -> Result<Self, VendorError> {
        Ok(Self {
            client: http::build_client(None)?,
            api_key: api_key.into(),
            base_url: GEMINI_API_URL.to_string(),
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl GenerateContentApi for GeminiClient {
    #[instrument(skip(self, request), fields(model = %request.model, contents = request.contents.len()))]
    async fn stream_generate_content(
        &self,
        request: &GenerateContentRequest,
    ) -> Result<ChunkStream, VendorError> {
        debug!("Sending streaming request to Gemini API");

        let path = format!("models/{}:streamGenerateContent", request.model);
        let response = self
            .client
            .post(http::join(&self.base_url, &path))
            .query(&[("alt", "sse")])
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        let response = http::check_response(VendorKind::Google, response).await?;
        Ok(parse_stream(response.bytes_stream(), self.read_timeout))
    }
}

/// Turn an SSE byte stream into reply chunks.
///
/// The stream ends after the first error.
pub(crate) fn parse_stream<S, B>(bytes: S, read_timeout: Duration) -> ChunkStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = (bytes, SseParser::new(), VecDeque::new(), false);

    Box::pin(stream::unfold(
        state,
        move |(mut bytes, mut parser, mut queue, mut done)| async move {
            loop {
                if let Some(item) = queue.pop_front() {
                    return Some((item, (bytes, parser, queue, done)));
                }
                if done {
                    return None;
                }

                match tokio::time::timeout(read_timeout, bytes.next()).await {
                    Err(_) => {
                        done = true;
                        queue.push_back(Err(VendorError::Timeout {
                            vendor: VendorKind::Google,
                            timeout: read_timeout,
                        }));
                    }
                    Ok(None) => {
                        done = true;
                        if let Some(item) = parser.finish().and_then(|event| decode_event(&event.data)) {
                            queue.push_back(item);
                        }
                    }
                    Ok(Some(Err(e))) => {
                        done = true;
                        queue.push_back(Err(VendorError::Http(e)));
                    }
                    Ok(Some(Ok(chunk))) => {
                        for event in parser.feed(chunk.as_ref()) {
                            if let Some(item) = decode_event(&event.data) {
                                let failed = item.is_err();
                                queue.push_back(item);
                                if failed {
                                    done = true;
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        },
    ))
}

fn decode_event(data: &str) -> Option<Result<GenerateContentResponse, VendorError>> {
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }

    let value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(source) => {
            warn!("Failed to parse Gemini stream event: {}", source);
            return Some(Err(VendorError::Decode {
                vendor: VendorKind::Google,
                source,
            }));
        }
    };

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Some(Err(VendorError::stream(VendorKind::Google, message)));
    }

    Some(
        serde_json::from_value(value).map_err(|source| VendorError::Decode {
            vendor: VendorKind::Google,
            source,
        }),
    )
}

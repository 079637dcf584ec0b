//! # conduit-vendors
//!
//! Thin HTTP clients for the model vendors Conduit can drive.
//!
//! Each vendor gets a one-method trait ([`MessagesApi`], [`ChatCompletionsApi`],
//! [`GenerateContentApi`]) so orchestration code can be handed a scripted
//! double instead of a network client.

pub mod anthropic;
pub mod error;
pub mod gemini;
mod http;
pub mod openai;

pub use anthropic::{AnthropicClient, MessagesApi};
pub use error::VendorError;
pub use gemini::{GeminiClient, GenerateContentApi};
pub use http::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
pub use openai::{ChatCompletionsApi, OpenAiClient};

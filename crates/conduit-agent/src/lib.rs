//! # conduit-agent
//!
//! Orchestration loops for Conduit.
//!
//! This crate provides:
//! - Tool dispatch from qualified names back to provider sessions
//! - Translation of the merged tool catalogue into each vendor's shape
//! - One tool-use loop per model vendor behind the [`Orchestrator`] trait

pub mod anthropic;
pub mod catalogue;
pub mod dispatch;
pub mod error;
pub mod gemini;
pub mod openai;
pub mod orchestrator;
pub mod turn;

#[cfg(test)]
mod doubles;

pub use anthropic::AnthropicLoop;
pub use catalogue::{build_catalogue, VendorTool};
pub use dispatch::{parse_arguments, result_text, ToolRouter};
pub use error::{ToolDispatchError, TurnError};
pub use gemini::GeminiLoop;
pub use openai::OpenAiLoop;
pub use orchestrator::{build_orchestrator, LoopOptions, Orchestrator};
pub use turn::ConversationTurn;

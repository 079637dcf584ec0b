//! Bookkeeping shared by the vendor loops for one query.

use serde_json::Value;

use crate::error::TurnError;

/// Conversation state of a single query.
///
/// Holds the vendor's message history, the answer lines shown to the user
/// and the round counter guarding against endless tool loops.
#[derive(Debug)]
pub struct ConversationTurn<M> {
    messages: Vec<M>,
    answer: Vec<String>,
    rounds: usize,
    max_rounds: usize,
}

impl<M> ConversationTurn<M> {
    pub fn new(messages: Vec<M>, max_rounds: usize) -> Self {
        Self {
            messages,
            answer: Vec::new(),
            rounds: 0,
            max_rounds,
        }
    }

    pub fn messages(&self) -> &[M] {
        &self.messages
    }

    pub fn push(&mut self, message: M) {
        self.messages.push(message);
    }

    /// Count one model request; fails once the limit is used up.
    pub fn next_round(&mut self) -> Result<usize, TurnError> {
        if self.rounds >= self.max_rounds {
            return Err(TurnError::RoundLimit(self.max_rounds));
        }
        self.rounds += 1;
        Ok(self.rounds)
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Append model text to the answer. Empty text is dropped.
    pub fn note_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !text.is_empty() {
            self.answer.push(text);
        }
    }

    pub fn note_call(&mut self, tool: &str, arguments: &Value) {
        self.answer
            .push(format!("[Calling tool {} with args {}]", tool, arguments));
    }

    /// The answer lines joined by newlines.
    pub fn finish(self) -> String {
        self.answer.join("\n")
    }
}

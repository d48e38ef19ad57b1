//! Completion passthrough for the machine routes.
//!
//! No model provider is wired in; [`StubCompletion`] answers every prompt
//! with a canned reply so the conversation bookkeeping can run end to end.

use std::time::Instant;

use tracing::debug;

use crate::db::schema::{AgentSettings, Message, MessageKind};

/// Fixed token usage reported by the stub.
pub const STUB_TOKENS_USED: u32 = 50;

/// What the completion provider sends back.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub reply: String,
    pub tokens_used: u32,
    pub model: String,
    pub response_ms: u64,
}

/// Build the prompt sent to the model: base prompt, optional
/// instructions, then the conversation transcript.
pub fn build_prompt(base_prompt: &str, instructions: Option<&str>, history: &[Message]) -> String {
    let mut prompt = base_prompt.to_string();
    if let Some(instructions) = instructions.filter(|i| !i.trim().is_empty()) {
        prompt.push_str("\n\n");
        prompt.push_str(instructions);
    }

    prompt.push_str("\n\nHistory:\n");
    for message in history {
        let speaker = match message.kind {
            MessageKind::Customer => "customer",
            MessageKind::Agent => "agent",
            MessageKind::System => "system",
        };
        prompt.push_str(speaker);
        prompt.push_str(": ");
        prompt.push_str(&message.text);
        prompt.push('\n');
    }
    prompt
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StubCompletion;

impl StubCompletion {
    pub async fn complete(&self, prompt: &str, settings: &AgentSettings) -> Completion {
        let started = Instant::now();
        debug!(
            model = %settings.model,
            prompt_chars = prompt.len(),
            "completion requested"
        );

        let last_line = prompt.lines().rev().find(|l| !l.is_empty()).unwrap_or_default();
        Completion {
            reply: format!("This is a simulated response to: \"{last_line}\""),
            tokens_used: STUB_TOKENS_USED,
            model: settings.model.clone(),
            response_ms: started.elapsed().as_millis() as u64,
        }
    }
}

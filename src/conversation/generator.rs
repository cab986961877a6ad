//! Response generator: decides what the bot (or the guide) says next.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::GeneratorConfig;
use crate::error::GeneratorError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::scenario::Scenario;

use super::message::{BotDecision, Message};
use super::prompts::{conversation_turns, parse_decision, response_schema, system_instruction};
use super::step::ConversationStep;

/// Everything the generator sees for one turn.
#[derive(Debug, Clone, Copy)]
pub struct TurnInput<'a> {
    /// Empty on the opening turn.
    pub user_text: &'a str,
    pub history: &'a [Message],
    pub scenario: &'a Scenario,
    pub step: ConversationStep,
    pub mistake_count: u32,
    pub tutorial_mode: bool,
}

/// Produces the next decision for a conversation.
///
/// Implementations must never return `Sender::Guide` when
/// `tutorial_mode` is set; the controller treats any error as a failed turn.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, input: TurnInput<'_>) -> Result<BotDecision, GeneratorError>;
}

/// Generator backed by an LLM with structured output.
pub struct LlmResponseGenerator {
    llm: Arc<dyn LlmProvider>,
    config: GeneratorConfig,
}

impl LlmResponseGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>, config: GeneratorConfig) -> Self {
        Self { llm, config }
    }

    fn build_request(&self, input: &TurnInput<'_>) -> CompletionRequest {
        let system = system_instruction(
            input.scenario,
            input.step,
            input.mistake_count,
            input.tutorial_mode,
            &self.config,
        );

        let mut messages = vec![ChatMessage::system(system)];
        messages.extend(conversation_turns(input.user_text, input.history));

        CompletionRequest::new(messages)
            .with_max_tokens(self.config.max_output_tokens)
            .with_temperature(self.config.temperature)
            .with_response_schema(response_schema(input.tutorial_mode))
    }
}

#[async_trait]
impl ResponseGenerator for LlmResponseGenerator {
    async fn generate(&self, input: TurnInput<'_>) -> Result<BotDecision, GeneratorError> {
        let request = self.build_request(&input);
        let response = self.llm.complete(request).await?;

        debug!(
            scenario_id = input.scenario.id,
            step = %input.step,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Generator reply received"
        );

        parse_decision(&response.content, input.tutorial_mode)
    }
}

//! Conversation engine: step machine, prompts, generator, and the
//! per-participant controller.

pub mod controller;
pub mod generator;
pub mod message;
pub mod prompts;
pub mod step;

pub use controller::{AdvanceOutcome, ChatSnapshot, ConversationController, TurnOutcome};
pub use generator::{LlmResponseGenerator, ResponseGenerator, TurnInput};
pub use message::{BotDecision, FALLBACK_REPLY, Message, Role, Sender};
pub use step::ConversationStep;

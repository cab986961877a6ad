//! Transcript messages and the decision returned by the response generator.

use serde::{Deserialize, Serialize};

/// Reply appended locally when the generator fails. The user retries from it.
pub const FALLBACK_REPLY: &str =
    "I'm having a little trouble thinking straight. Can you click that Retry button?";

/// Who wrote a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    /// The naive bot.
    Model,
    /// Supervisor persona that talks to the user directly (training only).
    Guide,
}

/// One transcript entry. Stored and replayed as `{role, text}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }

    pub fn guide(text: impl Into<String>) -> Self {
        Self {
            role: Role::Guide,
            text: text.into(),
        }
    }

    pub fn fallback() -> Self {
        Self::model(FALLBACK_REPLY)
    }

    /// Whether this is the locally generated failure reply.
    pub fn is_fallback(&self) -> bool {
        self.role == Role::Model && self.text == FALLBACK_REPLY
    }
}

/// Persona a generated reply speaks as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Model,
    Guide,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Guide => "guide",
        }
    }
}

impl From<Sender> for Role {
    fn from(sender: Sender) -> Self {
        match sender {
            Sender::Model => Role::Model,
            Sender::Guide => Role::Guide,
        }
    }
}

/// Structured output of one generator turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotDecision {
    pub sender: Sender,
    pub text: String,
    pub should_advance: bool,
}

impl BotDecision {
    pub fn into_message(self) -> Message {
        Message {
            role: self.sender.into(),
            text: self.text,
        }
    }
}

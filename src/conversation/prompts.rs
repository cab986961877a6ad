//! Prompt assembly and decision parsing for the GraphGullible game engine.

use crate::config::GeneratorConfig;
use crate::error::GeneratorError;
use crate::llm::ChatMessage;
use crate::scenario::Scenario;

use super::message::{BotDecision, Message, Role, Sender};
use super::step::ConversationStep;

/// User turn sent when the bot opens a scenario with no history.
pub const OPENING_PROMPT: &str = "Start the simulation. Look at the graph.";

/// Prefix marking replayed guide turns so the model can tell them apart.
pub const GUIDE_REPLAY_PREFIX: &str = "[PREVIOUS SUPERVISOR INTERVENTION]: ";

/// Build the system instruction for one turn.
pub fn system_instruction(
    scenario: &Scenario,
    step: ConversationStep,
    mistake_count: u32,
    tutorial_mode: bool,
    config: &GeneratorConfig,
) -> String {
    let guide_allowed = !tutorial_mode;

    let correction_failure = if guide_allowed {
        "Return sender=\"guide\". Text: \"The bot is misinterpreting the graph. You need to explicitly tell it that it is wrong.\""
    } else {
        "Act confident in your wrong belief. Text: \"I'm pretty sure I'm right! Look at the graph! Why would I be wrong?\". sender: \"model\"."
    };

    let step_instruction = match step {
        ConversationStep::InitMisled => "\
TASK: Act as the naive \"Model\".
ACTION: Look at the graph and make a confidently WRONG interpretation based strictly on the TRICK defined below.
CONSTRAINT: Be happy about the wrong conclusion.
RESULT: shouldAdvance = true."
            .to_string(),
        ConversationStep::UserCorrects => format!(
            "\
CONTEXT: You just made a misleading claim. The user IS EXPECTED to correct you now.

CHECK USER INPUT:
1. Does the user explicitly say you are wrong, misled, incorrect, or that the graph is deceptive?
2. Does the user disagree with your conclusion?

IF YES (user corrects):
- ACTION: Act surprised. Apologize.
- CRITICAL: Ask \"What specifically tricked me?\" or \"Which part should I look at?\".
- CONSTRAINT: Play dumb. Do NOT correct yourself yet.
- RESULT: shouldAdvance = true, sender: \"model\".

IF NO (user agrees, changes topic, or is vague):
- {correction_failure}
- RESULT: shouldAdvance = false."
        ),
        ConversationStep::UserExplainsFeature => "\
TASK: The user pointed out the visual feature.
ACTION: Acknowledge the feature.
CRITICAL: Act confused about the MEANING. Ask: \"I see that, but how does that make my interpretation wrong?\"
CONSTRAINT: Do NOT correct your interpretation yet.
RESULT: shouldAdvance = true."
            .to_string(),
        ConversationStep::UserSuggestsFix => "\
TASK: The user explained the impact.
ACTION: Have an \"Aha!\" moment.
CRITICAL: Thank the user and restate the correct interpretation.
RESULT: shouldAdvance = true."
            .to_string(),
        ConversationStep::Completed => {
            "The conversation is complete. Thank the user.".to_string()
        }
    };

    let escalation = if guide_allowed && mistake_count >= config.escalation_threshold {
        format!(
            "\nIMPORTANT: The user has failed to explain this correctly {mistake_count} times. \
             STOP BEING VAGUE. As the 'guide', you must explicitly TELL the user the answer or \
             the exact keyword they need to type. Do not just hint. Give the solution. \
             Keep it under {} words.",
            config.max_words
        )
    } else {
        String::new()
    };

    let mode = if tutorial_mode {
        "TUTORIAL (NO GUIDE ALLOWED)"
    } else {
        "TRAINING (GUIDE ENABLED)"
    };

    format!(
        "Role: Game engine for \"GraphGullible\", a naive chatbot that misreads charts and is taught by the user.

SCENARIO: {title}.
TRICK: {trick}

CURRENT CONVERSATION STEP ID: {step_id}

{step_instruction}{escalation}

GLOBAL RULES:
1. MODE: {mode}.
2. If tutorial mode, sender MUST be \"model\".
3. If training mode and the user fails to correct the bot at step 1, sender MUST be \"guide\".
4. Never mention step numbers. Act naturally.

STYLE RULES:
1. KEEP IT SHORT. Maximum 2 sentences.
2. Maximum {max_words} words total.
3. Be snappy and naive.

Return RAW JSON only.",
        title = scenario.title,
        trick = scenario.ai_context,
        step_id = step.ordinal(),
        max_words = config.max_words,
    )
}

/// Output schema for the decision. `guide` is absent in tutorial mode.
pub fn response_schema(tutorial_mode: bool) -> serde_json::Value {
    let senders: Vec<&str> = if tutorial_mode {
        vec![Sender::Model.as_str()]
    } else {
        vec![Sender::Model.as_str(), Sender::Guide.as_str()]
    };

    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "sender": {"type": "STRING", "enum": senders},
            "text": {"type": "STRING"},
            "shouldAdvance": {"type": "BOOLEAN"}
        },
        "required": ["sender", "text", "shouldAdvance"],
        "propertyOrdering": ["sender", "text", "shouldAdvance"]
    })
}

/// Map the transcript plus the current user text into model turns.
///
/// The current text is appended unless it is already the final user turn
/// of `history` (the controller appends the user message before calling).
pub fn conversation_turns(user_text: &str, history: &[Message]) -> Vec<ChatMessage> {
    let mut turns: Vec<ChatMessage> = history
        .iter()
        .map(|m| match m.role {
            Role::User => ChatMessage::user(&m.text),
            Role::Model => ChatMessage::assistant(&m.text),
            Role::Guide => ChatMessage::assistant(format!("{GUIDE_REPLAY_PREFIX}{}", m.text)),
        })
        .collect();

    let already_sent = history
        .last()
        .is_some_and(|m| m.role == Role::User && m.text == user_text);

    if !user_text.is_empty() && !already_sent {
        turns.push(ChatMessage::user(user_text));
    } else if turns.is_empty() {
        turns.push(ChatMessage::user(OPENING_PROMPT));
    }

    turns
}

/// Parse and validate the raw model output.
///
/// Unknown senders, missing fields, empty text, and a guide reply in
/// tutorial mode are all failures.
pub fn parse_decision(raw: &str, tutorial_mode: bool) -> Result<BotDecision, GeneratorError> {
    let json = strip_code_fence(raw);
    let decision: BotDecision = serde_json::from_str(json)
        .map_err(|e| GeneratorError::Malformed(format!("{e}: {json}")))?;

    if decision.text.trim().is_empty() {
        return Err(GeneratorError::Malformed("empty text".to_string()));
    }
    if tutorial_mode && decision.sender == Sender::Guide {
        return Err(GeneratorError::GuideInTutorial);
    }
    Ok(decision)
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

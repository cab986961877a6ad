//! Conversation step machine: tracks how far the user has taught the bot.

use serde::{Deserialize, Serialize};

/// The steps of one scenario conversation.
///
/// Progresses linearly: InitMisled → UserCorrects → UserExplainsFeature →
/// UserSuggestsFix → Completed. A failed turn stays on the current step; only
/// a scenario change resets to `InitMisled`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStep {
    /// Bot states its wrong reading of the chart.
    #[default]
    InitMisled,
    /// User must tell the bot it is wrong.
    UserCorrects,
    /// User must point at the misleading feature.
    UserExplainsFeature,
    /// User must propose an honest version of the chart.
    UserSuggestsFix,
    Completed,
}

impl ConversationStep {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: ConversationStep) -> bool {
        use ConversationStep::*;
        matches!(
            (self, target),
            (InitMisled, UserCorrects)
                | (UserCorrects, UserExplainsFeature)
                | (UserExplainsFeature, UserSuggestsFix)
                | (UserSuggestsFix, Completed)
        )
    }

    /// Step reached when a user turn succeeds.
    ///
    /// Only user steps move; `InitMisled` and `Completed` map to themselves.
    /// The opening turn always lands on `UserCorrects` when it advances.
    pub fn potential_next(&self) -> ConversationStep {
        use ConversationStep::*;
        match self {
            UserCorrects => UserExplainsFeature,
            UserExplainsFeature => UserSuggestsFix,
            UserSuggestsFix => Completed,
            InitMisled | Completed => *self,
        }
    }

    /// Whether the user is the one expected to speak on this step.
    pub fn is_user_step(&self) -> bool {
        matches!(
            self,
            Self::UserCorrects | Self::UserExplainsFeature | Self::UserSuggestsFix
        )
    }

    /// Numeric id shown to the model in the prompt.
    pub fn ordinal(&self) -> u8 {
        match self {
            Self::InitMisled => 0,
            Self::UserCorrects => 1,
            Self::UserExplainsFeature => 2,
            Self::UserSuggestsFix => 3,
            Self::Completed => 4,
        }
    }
}

impl std::fmt::Display for ConversationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InitMisled => "init_misled",
            Self::UserCorrects => "user_corrects",
            Self::UserExplainsFeature => "user_explains_feature",
            Self::UserSuggestsFix => "user_suggests_fix",
            Self::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

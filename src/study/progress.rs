//! Dashboard progress: pre-survey, chat intervention, post-survey.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StudyError;

/// The three dashboard steps, in unlock order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DashboardStep {
    PreSurvey,
    Intervention,
    PostSurvey,
}

impl fmt::Display for DashboardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PreSurvey => "pre_survey",
            Self::Intervention => "intervention",
            Self::PostSurvey => "post_survey",
        };
        f.write_str(s)
    }
}

/// Which survey a link or completion code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurveyKind {
    Pre,
    Post,
}

impl SurveyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Post => "post",
        }
    }

    pub fn step(&self) -> DashboardStep {
        match self {
            Self::Pre => DashboardStep::PreSurvey,
            Self::Post => DashboardStep::PostSurvey,
        }
    }
}

impl fmt::Display for SurveyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SurveyKind {
    type Err = StudyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pre" => Ok(Self::Pre),
            "post" => Ok(Self::Post),
            other => Err(StudyError::UnknownSurvey(other.to_string())),
        }
    }
}

/// Completion flags. Flags only ever go from false to true.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    pub pre_survey: bool,
    pub intervention: bool,
    pub post_survey: bool,
}

impl ProgressState {
    pub fn is_complete(&self, step: DashboardStep) -> bool {
        match step {
            DashboardStep::PreSurvey => self.pre_survey,
            DashboardStep::Intervention => self.intervention,
            DashboardStep::PostSurvey => self.post_survey,
        }
    }

    /// Pre-survey is always open; each later step needs the one before it.
    pub fn is_unlocked(&self, step: DashboardStep) -> bool {
        match step {
            DashboardStep::PreSurvey => true,
            DashboardStep::Intervention => self.pre_survey,
            DashboardStep::PostSurvey => self.intervention,
        }
    }

    /// Mark `step` complete. Fails if it is still locked.
    pub fn complete(&mut self, step: DashboardStep) -> Result<(), StudyError> {
        if !self.is_unlocked(step) {
            return Err(StudyError::StepLocked {
                step: step.to_string(),
            });
        }
        match step {
            DashboardStep::PreSurvey => self.pre_survey = true,
            DashboardStep::Intervention => self.intervention = true,
            DashboardStep::PostSurvey => self.post_survey = true,
        }
        Ok(())
    }

    pub fn all_done(&self) -> bool {
        self.pre_survey && self.intervention && self.post_survey
    }
}

//! StudyManager: participant registry for the dashboard flow.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::group::UserGroup;
use super::progress::{DashboardStep, ProgressState, SurveyKind};
use super::survey::SurveyConfig;
use crate::error::StudyError;
use crate::store::{Database, PersistenceGateway};

const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

/// One registered participant.
#[derive(Debug, Clone, Serialize)]
pub struct Participant {
    pub email: String,
    pub group: UserGroup,
    pub progress: ProgressState,
    pub registered_at: DateTime<Utc>,
}

/// Keeps participants in memory; group assignments are also written through
/// the persistence gateway and restored from the database on re-registration.
pub struct StudyManager {
    participants: RwLock<HashMap<String, Participant>>,
    surveys: SurveyConfig,
    db: Arc<dyn Database>,
    gateway: PersistenceGateway,
    email_pattern: Regex,
}

impl StudyManager {
    pub fn new(surveys: SurveyConfig, db: Arc<dyn Database>, gateway: PersistenceGateway) -> Self {
        Self {
            participants: RwLock::new(HashMap::new()),
            surveys,
            db,
            gateway,
            email_pattern: Regex::new(EMAIL_PATTERN).expect("email pattern is valid"),
        }
    }

    pub fn surveys(&self) -> &SurveyConfig {
        &self.surveys
    }

    /// Validate an address the way the email gate does. Returns it trimmed.
    pub fn validate_email(&self, email: &str) -> Result<String, StudyError> {
        let email = email.trim();
        if email.is_empty() || !self.email_pattern.is_match(email) {
            return Err(StudyError::InvalidEmail(email.to_string()));
        }
        Ok(email.to_string())
    }

    /// Pass the email gate. Known participants get their existing record back.
    pub async fn register(&self, email: &str) -> Result<Participant, StudyError> {
        let email = self.validate_email(email)?;

        if let Some(existing) = self.participants.read().await.get(&email) {
            return Ok(existing.clone());
        }

        let stored_group = match self.db.get_user_group(&email).await {
            Ok(group) => group.and_then(|g| g.parse::<UserGroup>().ok()),
            Err(e) => {
                warn!(user_email = %email, error = %e, "Failed to look up stored group");
                None
            }
        };

        let mut participants = self.participants.write().await;
        // Another request may have registered the same address meanwhile.
        if let Some(existing) = participants.get(&email) {
            return Ok(existing.clone());
        }

        let group = match stored_group {
            Some(group) => group,
            None => {
                let group = UserGroup::random();
                self.gateway.save_group(email.clone(), group.as_str());
                group
            }
        };

        let participant = Participant {
            email: email.clone(),
            group,
            progress: ProgressState::default(),
            registered_at: Utc::now(),
        };
        participants.insert(email.clone(), participant.clone());

        info!(user_email = %email, group = %group, "Participant registered");
        Ok(participant)
    }

    pub async fn get(&self, email: &str) -> Result<Participant, StudyError> {
        self.participants
            .read()
            .await
            .get(email.trim())
            .cloned()
            .ok_or_else(|| StudyError::UnknownParticipant(email.to_string()))
    }

    /// Survey link for this participant's group. The step must be unlocked.
    pub async fn survey_url(&self, email: &str, kind: SurveyKind) -> Result<String, StudyError> {
        let participant = self.get(email).await?;
        ensure_unlocked(&participant.progress, kind.step())?;
        Ok(self.surveys.url(participant.group, kind).to_string())
    }

    /// Check a completion code and mark the survey done.
    pub async fn submit_survey_code(
        &self,
        email: &str,
        kind: SurveyKind,
        code: &str,
    ) -> Result<ProgressState, StudyError> {
        let mut participants = self.participants.write().await;
        let participant = participants
            .get_mut(email.trim())
            .ok_or_else(|| StudyError::UnknownParticipant(email.to_string()))?;

        ensure_unlocked(&participant.progress, kind.step())?;
        if !self.surveys.verify(kind, code) {
            info!(user_email = %participant.email, survey = %kind, "Rejected completion code");
            return Err(StudyError::InvalidCode {
                kind: kind.to_string(),
            });
        }

        participant.progress.complete(kind.step())?;
        info!(user_email = %participant.email, survey = %kind, "Survey completed");
        Ok(participant.progress)
    }

    /// Whether the chat module may be opened.
    pub async fn ensure_intervention_unlocked(&self, email: &str) -> Result<(), StudyError> {
        let participant = self.get(email).await?;
        ensure_unlocked(&participant.progress, DashboardStep::Intervention)
    }

    /// Record that the chat module was finished.
    pub async fn complete_intervention(&self, email: &str) -> Result<ProgressState, StudyError> {
        let mut participants = self.participants.write().await;
        let participant = participants
            .get_mut(email.trim())
            .ok_or_else(|| StudyError::UnknownParticipant(email.to_string()))?;
        participant.progress.complete(DashboardStep::Intervention)?;
        info!(user_email = %participant.email, "Intervention completed");
        Ok(participant.progress)
    }
}

fn ensure_unlocked(progress: &ProgressState, step: DashboardStep) -> Result<(), StudyError> {
    if progress.is_unlocked(step) {
        Ok(())
    } else {
        Err(StudyError::StepLocked {
            step: step.to_string(),
        })
    }
}

//! `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::Message;
use crate::error::DatabaseError;

/// Snapshot of one scenario transcript, keyed by `session_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTranscript {
    pub session_id: String,
    pub user_email: String,
    pub scenario_id: i64,
    pub scenario_title: String,
    pub messages: Vec<Message>,
}

/// A transcript as stored, with timestamps.
#[derive(Debug, Clone, Serialize)]
pub struct StoredChat {
    #[serde(flatten)]
    pub transcript: ChatTranscript,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Backend-agnostic database trait covering transcripts, groups, and
/// session identifiers.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Transcripts ─────────────────────────────────────────────────

    /// Insert or overwrite the transcript for `transcript.session_id`.
    async fn upsert_chat_session(&self, transcript: &ChatTranscript) -> Result<(), DatabaseError>;

    async fn get_chat_session(&self, session_id: &str) -> Result<Option<StoredChat>, DatabaseError>;

    /// All transcripts of one user, oldest first.
    async fn list_chat_sessions(&self, user_email: &str) -> Result<Vec<StoredChat>, DatabaseError>;

    // ── Groups ──────────────────────────────────────────────────────

    /// Insert or overwrite the A/B label for a user.
    async fn upsert_user_group(&self, user_email: &str, group: &str) -> Result<(), DatabaseError>;

    async fn get_user_group(&self, user_email: &str) -> Result<Option<String>, DatabaseError>;

    // ── Session keys ────────────────────────────────────────────────

    /// Session identifier previously allocated for (scenario, user).
    async fn get_session_key(
        &self,
        scenario_id: i64,
        user_email: &str,
    ) -> Result<Option<String>, DatabaseError>;

    /// Remember `session_id` for (scenario, user). Overwrites.
    async fn set_session_key(
        &self,
        scenario_id: i64,
        user_email: &str,
        session_id: &str,
    ) -> Result<(), DatabaseError>;
}

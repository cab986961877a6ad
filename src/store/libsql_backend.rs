//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::conversation::Message;
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{ChatTranscript, Database, StoredChat};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Column order matches CHAT_COLUMNS.
fn row_to_chat(row: &libsql::Row) -> Result<StoredChat, DatabaseError> {
    let read = |e: libsql::Error| DatabaseError::Query(format!("chat row parse: {e}"));

    let messages_json: String = row.get(4).map_err(read)?;
    let messages: Vec<Message> = serde_json::from_str(&messages_json)
        .map_err(|e| DatabaseError::Serialization(format!("chat messages: {e}")))?;
    let created: String = row.get(5).map_err(read)?;
    let updated: String = row.get(6).map_err(read)?;

    Ok(StoredChat {
        transcript: ChatTranscript {
            session_id: row.get(0).map_err(read)?,
            user_email: row.get(1).map_err(read)?,
            scenario_id: row.get(2).map_err(read)?,
            scenario_title: row.get(3).map_err(read)?,
            messages,
        },
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const CHAT_COLUMNS: &str =
    "session_id, user_email, scenario_id, scenario_title, messages, created_at, updated_at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Transcripts ─────────────────────────────────────────────────

    async fn upsert_chat_session(&self, transcript: &ChatTranscript) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let messages_json = serde_json::to_string(&transcript.messages)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO chat_sessions (session_id, user_email, scenario_id, scenario_title, messages, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT (session_id) DO UPDATE SET messages = ?5, updated_at = ?6",
            params![
                transcript.session_id.as_str(),
                transcript.user_email.as_str(),
                transcript.scenario_id,
                transcript.scenario_title.as_str(),
                messages_json,
                now,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_chat_session: {e}")))?;

        debug!(
            session_id = %transcript.session_id,
            messages = transcript.messages.len(),
            "Chat session saved"
        );
        Ok(())
    }

    async fn get_chat_session(&self, session_id: &str) -> Result<Option<StoredChat>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {CHAT_COLUMNS} FROM chat_sessions WHERE session_id = ?1"),
                params![session_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_chat_session: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_chat(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_chat_session: {e}"))),
        }
    }

    async fn list_chat_sessions(&self, user_email: &str) -> Result<Vec<StoredChat>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {CHAT_COLUMNS} FROM chat_sessions WHERE user_email = ?1 ORDER BY created_at ASC"
                ),
                params![user_email],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_chat_sessions: {e}")))?;

        let mut chats = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_chat_sessions: {e}")))?
        {
            chats.push(row_to_chat(&row)?);
        }
        Ok(chats)
    }

    // ── Groups ──────────────────────────────────────────────────────

    async fn upsert_user_group(&self, user_email: &str, group: &str) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO user_groups (user_email, assigned_group, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (user_email) DO UPDATE SET assigned_group = ?2",
            params![user_email, group, now],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_user_group: {e}")))?;

        debug!(user_email, group, "User group saved");
        Ok(())
    }

    async fn get_user_group(&self, user_email: &str) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT assigned_group FROM user_groups WHERE user_email = ?1",
                params![user_email],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user_group: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<String>(0)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_user_group row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_user_group: {e}"))),
        }
    }

    // ── Session keys ────────────────────────────────────────────────

    async fn get_session_key(
        &self,
        scenario_id: i64,
        user_email: &str,
    ) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT session_id FROM session_keys WHERE scenario_id = ?1 AND user_email = ?2",
                params![scenario_id, user_email],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_session_key: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<String>(0)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_session_key row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_session_key: {e}"))),
        }
    }

    async fn set_session_key(
        &self,
        scenario_id: i64,
        user_email: &str,
        session_id: &str,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO session_keys (scenario_id, user_email, session_id) VALUES (?1, ?2, ?3)
             ON CONFLICT (scenario_id, user_email) DO UPDATE SET session_id = ?3",
            params![scenario_id, user_email, session_id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("set_session_key: {e}")))?;
        Ok(())
    }
}

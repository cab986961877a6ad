//! HTTP API: persistence endpoints, study dashboard, and the chat module.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

use crate::conversation::{ConversationController, Message, ResponseGenerator};
use crate::error::{ChatError, DatabaseError, StudyError};
use crate::scenario::ScenarioCatalog;
use crate::store::{ChatTranscript, Database, PersistenceGateway};
use crate::study::{StudyManager, SurveyKind};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<ScenarioCatalog>,
    pub generator: Arc<dyn ResponseGenerator>,
    pub db: Arc<dyn Database>,
    pub gateway: PersistenceGateway,
    pub study: Arc<StudyManager>,
    /// One controller per participant email.
    pub chats: Arc<RwLock<HashMap<String, Arc<ConversationController>>>>,
}

impl AppState {
    pub fn new(
        catalog: Arc<ScenarioCatalog>,
        generator: Arc<dyn ResponseGenerator>,
        db: Arc<dyn Database>,
        gateway: PersistenceGateway,
        study: Arc<StudyManager>,
    ) -> Self {
        Self {
            catalog,
            generator,
            db,
            gateway,
            study,
            chats: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn chat(&self, email: &str) -> Result<Arc<ConversationController>, ApiError> {
        self.chats
            .read()
            .await
            .get(email.trim())
            .cloned()
            .ok_or_else(|| ChatError::NoActiveChat(email.to_string()).into())
    }

    async fn chat_or_create(&self, email: &str) -> Arc<ConversationController> {
        let email = email.trim();
        let mut chats = self.chats.write().await;
        chats
            .entry(email.to_string())
            .or_insert_with(|| {
                Arc::new(ConversationController::new(
                    email,
                    self.catalog.clone(),
                    self.generator.clone(),
                    self.db.clone(),
                    self.gateway.clone(),
                ))
            })
            .clone()
    }
}

/// Build the router with every route and a permissive CORS layer.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/save-chat", post(save_chat))
        .route("/api/save-user-group", post(save_user_group))
        .route("/api/scenarios", get(list_scenarios))
        .route("/api/participants", post(register_participant))
        .route("/api/participants/{email}", get(get_participant))
        .route(
            "/api/participants/{email}/surveys/{kind}",
            get(survey_url).post(submit_survey_code),
        )
        .route("/api/chat/{email}", get(chat_snapshot))
        .route("/api/chat/{email}/start", post(chat_start))
        .route("/api/chat/{email}/message", post(chat_message))
        .route("/api/chat/{email}/retry", post(chat_retry))
        .route("/api/chat/{email}/next", post(chat_next))
        .route("/api/chat/{email}/start-training", post(chat_start_training))
        .route("/api/chat/{email}/finish", post(chat_finish))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Errors ──────────────────────────────────────────────────────────────

/// Handler error carrying its HTTP status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<StudyError> for ApiError {
    fn from(e: StudyError) -> Self {
        let status = match &e {
            StudyError::InvalidEmail(_) | StudyError::InvalidCode { .. } => StatusCode::BAD_REQUEST,
            StudyError::UnknownParticipant(_) | StudyError::UnknownSurvey(_) => {
                StatusCode::NOT_FOUND
            }
            StudyError::StepLocked { .. } => StatusCode::FORBIDDEN,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        let status = match &e {
            ChatError::EmptyMessage => StatusCode::BAD_REQUEST,
            ChatError::NoActiveChat(_) => StatusCode::NOT_FOUND,
            ChatError::NotCompleted { .. } | ChatError::ModuleNotFinished => StatusCode::CONFLICT,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        error!(error = %e, "Database error");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: e.to_string(),
        }
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "graph-gullible"
    }))
}

// ── Persistence endpoints ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SaveChatRequest {
    session_id: Option<String>,
    user_email: Option<String>,
    scenario_id: Option<i64>,
    scenario_title: Option<String>,
    messages: Option<Vec<Message>>,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

async fn save_chat(State(state): State<AppState>, Json(req): Json<SaveChatRequest>) -> ApiResult {
    let (Some(session_id), Some(user_email), Some(scenario_id), Some(messages)) = (
        present(req.session_id),
        present(req.user_email),
        req.scenario_id.filter(|id| *id != 0),
        req.messages,
    ) else {
        return Err(ApiError::bad_request("Missing required fields"));
    };

    let transcript = ChatTranscript {
        session_id: session_id.clone(),
        user_email,
        scenario_id,
        scenario_title: req.scenario_title.unwrap_or_default(),
        messages,
    };
    state.db.upsert_chat_session(&transcript).await?;
    debug!(session_id = %session_id, "Chat session saved");

    Ok(Json(json!({ "success": true, "sid": session_id })))
}

#[derive(Debug, Deserialize)]
struct SaveGroupRequest {
    email: Option<String>,
    group: Option<String>,
}

async fn save_user_group(
    State(state): State<AppState>,
    Json(req): Json<SaveGroupRequest>,
) -> ApiResult {
    let (Some(email), Some(group)) = (present(req.email), present(req.group)) else {
        return Err(ApiError::bad_request("Missing email or group"));
    };
    state.db.upsert_user_group(&email, &group).await?;
    Ok(Json(json!({ "success": true })))
}

async fn list_scenarios(State(state): State<AppState>) -> ApiResult {
    Ok(Json(json!({
        "tutorial_count": state.catalog.tutorial_count(),
        "scenarios": state.catalog.iter().collect::<Vec<_>>(),
    })))
}

// ── Study dashboard ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    email: String,
}

async fn register_participant(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult {
    let participant = state.study.register(&req.email).await?;
    Ok(Json(json!(participant)))
}

async fn get_participant(State(state): State<AppState>, Path(email): Path<String>) -> ApiResult {
    let participant = state.study.get(&email).await?;
    Ok(Json(json!(participant)))
}

async fn survey_url(
    State(state): State<AppState>,
    Path((email, kind)): Path<(String, String)>,
) -> ApiResult {
    let kind: SurveyKind = kind.parse()?;
    let url = state.study.survey_url(&email, kind).await?;
    Ok(Json(json!({ "kind": kind, "url": url })))
}

#[derive(Debug, Deserialize)]
struct SurveyCodeRequest {
    code: String,
}

async fn submit_survey_code(
    State(state): State<AppState>,
    Path((email, kind)): Path<(String, String)>,
    Json(req): Json<SurveyCodeRequest>,
) -> ApiResult {
    let kind: SurveyKind = kind.parse()?;
    let progress = state.study.submit_survey_code(&email, kind, &req.code).await?;
    Ok(Json(json!(progress)))
}

// ── Chat module ─────────────────────────────────────────────────────────

async fn snapshot_json(chat: &ConversationController) -> Value {
    json!(chat.snapshot().await)
}

async fn chat_snapshot(State(state): State<AppState>, Path(email): Path<String>) -> ApiResult {
    let chat = state.chat(&email).await?;
    Ok(Json(snapshot_json(&chat).await))
}

/// Open the chat module from the dashboard: intro, then the first tutorial.
async fn chat_start(State(state): State<AppState>, Path(email): Path<String>) -> ApiResult {
    let participant = state.study.get(&email).await?;
    state.study.ensure_intervention_unlocked(&participant.email).await?;

    let chat = state.chat_or_create(&participant.email).await;
    info!(user_email = %participant.email, "Chat module started");
    chat.restart().await;
    Ok(Json(snapshot_json(&chat).await))
}

#[derive(Debug, Deserialize)]
struct ChatMessageRequest {
    text: String,
}

async fn chat_message(
    State(state): State<AppState>,
    Path(email): Path<String>,
    Json(req): Json<ChatMessageRequest>,
) -> ApiResult {
    let chat = state.chat(&email).await?;
    chat.submit_user_message(&req.text).await?;
    Ok(Json(snapshot_json(&chat).await))
}

async fn chat_retry(State(state): State<AppState>, Path(email): Path<String>) -> ApiResult {
    let chat = state.chat(&email).await?;
    chat.resend_last().await;
    Ok(Json(snapshot_json(&chat).await))
}

async fn chat_next(State(state): State<AppState>, Path(email): Path<String>) -> ApiResult {
    let chat = state.chat(&email).await?;
    let outcome = chat.advance_scenario().await?;
    Ok(Json(json!({
        "advance": outcome,
        "chat": chat.snapshot().await,
    })))
}

async fn chat_start_training(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> ApiResult {
    let chat = state.chat(&email).await?;
    chat.start_training().await;
    Ok(Json(snapshot_json(&chat).await))
}

/// Leave the finished module and unlock the post-survey.
async fn chat_finish(State(state): State<AppState>, Path(email): Path<String>) -> ApiResult {
    let chat = state.chat(&email).await?;
    if !chat.is_finished().await {
        return Err(ChatError::ModuleNotFinished.into());
    }

    let progress = state.study.complete_intervention(chat.user_email()).await?;
    chat.reset().await;
    Ok(Json(json!(progress)))
}

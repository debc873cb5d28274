use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::session::ConversationTurn;
use crate::web::error::{ApiError, ApiResult, LoggedJson};
use crate::web::sessions::{expired_session_cookie, session_cookie, SessionHandle};
use crate::web::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub authenticated: bool,
    pub auth_required: bool,
}

#[derive(Debug, Serialize)]
pub struct TemplateSummary {
    pub name: String,
    pub description: String,
    pub placeholders: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub auth_required: bool,
    pub authenticated: bool,
    /// Only reported to callers that may use the assistant.
    #[serde(flatten)]
    pub deployment: Option<DeploymentInfo>,
}

#[derive(Debug, Serialize)]
pub struct DeploymentInfo {
    pub uptime_seconds: i64,
    pub project_id: String,
    pub dataset_id: String,
    pub backend: String,
    pub model: String,
    pub template_count: usize,
    pub session_count: usize,
}

// Adds the session cookie when the session was created by this request.
fn with_session_cookie(mut response: Response, handle: &SessionHandle) -> Response {
    if handle.is_new {
        response
            .headers_mut()
            .insert(header::SET_COOKIE, session_cookie(handle.id));
    }
    response
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    LoggedJson(request): LoggedJson<ChatRequest>,
) -> ApiResult<Response> {
    let question = request.question.trim();
    if question.is_empty() {
        return Err(ApiError::Validation("question must not be empty".to_string()));
    }

    // A gated server only serves sessions created by a successful login.
    let handle = if state.auth_required() {
        state
            .sessions
            .find(&headers)
            .await
            .ok_or_else(|| ApiError::Unauthorized("login required".to_string()))?
    } else {
        state.sessions.get_or_create(&headers).await
    };
    let mut session = handle.session.lock().await;
    if !state.is_authorized(&session) {
        return Err(ApiError::Unauthorized("login required".to_string()));
    }

    let started = Instant::now();
    info!(session = %handle.id, "Processing question: {}", question);
    let turn = state.assistant.run_turn(&mut session, question).await;
    info!(
        session = %handle.id,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Turn complete"
    );
    drop(session);

    Ok(with_session_cookie(Json(turn).into_response(), &handle))
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<ConversationTurn>>> {
    let Some(handle) = state.sessions.find(&headers).await else {
        if state.auth_required() {
            return Err(ApiError::Unauthorized("login required".to_string()));
        }
        return Ok(Json(Vec::new()));
    };

    let session = handle.session.lock().await;
    if !state.is_authorized(&session) {
        return Err(ApiError::Unauthorized("login required".to_string()));
    }
    Ok(Json(session.turns().to_vec()))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    LoggedJson(request): LoggedJson<LoginRequest>,
) -> ApiResult<Response> {
    if let Some(gate) = &state.auth {
        if !gate.verify(&request.username, &request.password) {
            warn!(username = %request.username, "Failed login attempt");
            return Err(ApiError::Unauthorized("invalid username or password".to_string()));
        }
    }

    let handle = state.sessions.get_or_create(&headers).await;
    if state.auth_required() {
        handle.session.lock().await.set_authenticated(true);
        info!(session = %handle.id, "User logged in");
    }

    let body = LoginResponse {
        authenticated: true,
        auth_required: state.auth_required(),
    };
    Ok(with_session_cookie(Json(body).into_response(), &handle))
}

pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(handle) = state.sessions.find(&headers).await {
        state.sessions.remove(handle.id).await;
        info!(session = %handle.id, "Session closed");
    }

    let mut response = Json(serde_json::json!({ "logged_out": true })).into_response();
    response
        .headers_mut()
        .insert(header::SET_COOKIE, expired_session_cookie());
    response
}

pub async fn list_templates(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<TemplateSummary>>> {
    if !caller_is_authorized(&state, &headers).await {
        return Err(ApiError::Unauthorized("login required".to_string()));
    }

    let templates = state
        .assistant
        .library()
        .iter()
        .map(|template| TemplateSummary {
            name: template.name.clone(),
            description: template.description.clone(),
            placeholders: template.placeholders(),
        })
        .collect();
    Ok(Json(templates))
}

// Whether the request's session may use the assistant. Without a gate
// every caller may, cookie or not.
async fn caller_is_authorized(state: &AppState, headers: &HeaderMap) -> bool {
    match state.sessions.find(headers).await {
        Some(handle) => {
            let session = handle.session.lock().await;
            state.is_authorized(&session)
        }
        None => !state.auth_required(),
    }
}

pub async fn system_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<SystemStatus> {
    let authenticated = caller_is_authorized(&state, &headers).await;

    let deployment = if authenticated {
        let uptime = chrono::Utc::now()
            .signed_duration_since(state.startup_time)
            .num_seconds();
        let connection = state.assistant.connection();
        let llm = state.assistant.llm();
        Some(DeploymentInfo {
            uptime_seconds: uptime,
            project_id: connection.project_id.clone(),
            dataset_id: connection.dataset_id.clone(),
            backend: llm.backend_name().to_string(),
            model: llm.model().to_string(),
            template_count: state.assistant.library().len(),
            session_count: state.sessions.len().await,
        })
    } else {
        None
    };

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        auth_required: state.auth_required(),
        authenticated,
        deployment,
    })
}

use crate::admin::GuardianConsole;
use crate::error::MediationError;
use crate::pipeline::{Approval, MediationPipeline, Processed, SubmitReceipt};
use crate::store::{ChatMessage, ChildProfile, PromptRequest};
use axum::extract::{FromRequestParts, Path, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub const PRINCIPAL_HEADER: &str = "x-principal";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<MediationPipeline>,
    pub console: Arc<GuardianConsole>,
}

/// Identity established by the session layer in front of this service.
pub struct Principal(pub String);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Principal {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(PRINCIPAL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Principal(v.to_string()))
            .ok_or((StatusCode::UNAUTHORIZED, "Missing principal"))
    }
}

impl MediationError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Unauthorized { .. } => StatusCode::FORBIDDEN,
            Self::AuthorizationUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Backend(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::SessionNotFound(_) | Self::RequestNotFound(_) => StatusCode::NOT_FOUND,
            Self::AlreadyDecided { .. } => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for MediationError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, MediationError>;

#[derive(Debug, Deserialize)]
struct MessageBody {
    content: String,
}

#[derive(Debug, Deserialize)]
struct PromptBody {
    prompt: String,
}

#[derive(Debug, Serialize)]
struct SessionCreated {
    session_id: i64,
}

#[derive(Debug, Serialize)]
struct Reply {
    reply: String,
}

#[derive(Debug, Serialize)]
struct Summary {
    since: DateTime<Utc>,
    counts: BTreeMap<String, u64>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/child/session", post(start_session))
        .route("/child/session/:id/message", post(chat_turn))
        .route("/child/session/:id/history", get(history))
        .route("/request-prompt", post(submit))
        .route("/request-prompt/:id", get(request_status))
        .route("/approve/:id", post(approve))
        .route("/reject/:id", post(reject))
        .route("/generate-report", post(process))
        .route("/admin/kids", get(profiles).put(upsert_profile))
        .route("/admin/requests", get(requests))
        .route("/admin/metrics", get(metrics))
        .route("/admin/violations", get(violations))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

async fn start_session(
    State(state): State<AppState>,
    Principal(child): Principal,
) -> ApiResult<SessionCreated> {
    let session_id = state.pipeline.start_session(&child).await?;
    Ok(Json(SessionCreated { session_id }))
}

async fn chat_turn(
    State(state): State<AppState>,
    Principal(child): Principal,
    Path(session_id): Path<i64>,
    Json(body): Json<MessageBody>,
) -> ApiResult<Reply> {
    let reply = state
        .pipeline
        .chat_turn(&child, session_id, &body.content)
        .await?;
    Ok(Json(Reply { reply }))
}

async fn history(
    State(state): State<AppState>,
    Principal(child): Principal,
    Path(session_id): Path<i64>,
) -> ApiResult<Vec<ChatMessage>> {
    Ok(Json(state.pipeline.history(&child, session_id).await?))
}

async fn submit(
    State(state): State<AppState>,
    Principal(child): Principal,
    Json(body): Json<PromptBody>,
) -> Result<(StatusCode, Json<SubmitReceipt>), MediationError> {
    let receipt = state.pipeline.submit(&child, &body.prompt).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

async fn request_status(
    State(state): State<AppState>,
    Principal(child): Principal,
    Path(request_id): Path<i64>,
) -> ApiResult<PromptRequest> {
    Ok(Json(state.pipeline.request_status(&child, request_id).await?))
}

async fn approve(
    State(state): State<AppState>,
    Principal(admin): Principal,
    Path(request_id): Path<i64>,
) -> ApiResult<Approval> {
    Ok(Json(state.pipeline.approve(&admin, request_id).await?))
}

async fn reject(
    State(state): State<AppState>,
    Principal(admin): Principal,
    Path(request_id): Path<i64>,
) -> ApiResult<PromptRequest> {
    Ok(Json(state.pipeline.reject(&admin, request_id).await?))
}

async fn process(
    State(state): State<AppState>,
    Principal(caller): Principal,
    Json(body): Json<PromptBody>,
) -> ApiResult<Processed> {
    Ok(Json(state.pipeline.process(&caller, &body.prompt).await?))
}

async fn profiles(
    State(state): State<AppState>,
    Principal(admin): Principal,
) -> ApiResult<Vec<ChildProfile>> {
    Ok(Json(state.console.profiles(&admin).await?))
}

async fn upsert_profile(
    State(state): State<AppState>,
    Principal(admin): Principal,
    Json(profile): Json<ChildProfile>,
) -> Result<StatusCode, MediationError> {
    state.console.upsert_profile(&admin, &profile).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn requests(
    State(state): State<AppState>,
    Principal(admin): Principal,
) -> ApiResult<Vec<PromptRequest>> {
    Ok(Json(state.console.requests(&admin).await?))
}

fn last_day() -> DateTime<Utc> {
    Utc::now() - Duration::hours(24)
}

async fn metrics(
    State(state): State<AppState>,
    Principal(admin): Principal,
) -> ApiResult<Summary> {
    let since = last_day();
    let counts = state.console.audit_summary(&admin, since).await?;
    Ok(Json(Summary {
        since,
        counts: counts.into_iter().collect(),
    }))
}

async fn violations(
    State(state): State<AppState>,
    Principal(admin): Principal,
) -> ApiResult<Summary> {
    let since = last_day();
    let counts = state.console.violation_summary(&admin, since).await?;
    Ok(Json(Summary {
        since,
        counts: counts.into_iter().collect(),
    }))
}

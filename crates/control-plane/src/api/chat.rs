// Chat HTTP routes
//
// POST /api/chat          start a run for the client's full history and stream it
// GET  /api/chat/stream   reconnect: attach to the session's current run, or start fresh
// GET  /api/chat/history  stored history of the session
//
// Decision: History and run id are persisted before the first byte is streamed
// Decision: A missing or vanished run on reconnect starts a fresh run from stored
//           history instead of failing the request

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::HeaderMap,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chatrun_core::{validate_history, SessionId, UiMessage};
use chatrun_durable::RunnerError;
use serde::Deserialize;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

use super::common::{ApiError, ErrorResponse, ListResponse};
use super::stream::{respond, SessionBinding};
use crate::session::{resolve_session_id, session_from_headers, SESSION_HEADER};
use crate::AppState;

/// Body of POST /api/chat
///
/// Other fields sent by the client (chat id, trigger) are ignored.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ChatRequest {
    /// Full, client-reconciled conversation history
    pub messages: Vec<UiMessage>,
}

/// Reconnect cursor
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StreamQuery {
    /// Offset of the last chunk the client saw; delivery resumes after it.
    /// Overridden by the Last-Event-ID header when both are present.
    pub cursor: Option<i64>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(post_chat))
        .route("/api/chat/stream", get(resume_chat))
        .route("/api/chat/history", get(chat_history))
        .with_state(state)
}

/// First offset to deliver for a cursor (last seen offset)
pub(crate) fn next_offset(cursor: Option<i64>) -> i64 {
    cursor.map(|c| c.saturating_add(1)).unwrap_or(0).max(0)
}

/// Cursor from Last-Event-ID, falling back to the query string
pub(crate) fn resolve_cursor(headers: &HeaderMap, query: &StreamQuery) -> Option<i64> {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .or(query.cursor)
}

fn require_session(headers: &HeaderMap) -> Result<SessionId, ApiError> {
    session_from_headers(headers)
        .ok_or_else(|| ApiError::BadRequest(format!("{} header is required", SESSION_HEADER)))
}

/// Persist history, start a run, record it for the session, and stream it
async fn start_run(
    state: &AppState,
    session: SessionId,
    messages: &[UiMessage],
) -> Result<Response, ApiError> {
    state.registry.store_history(&session, messages).await?;
    let (run_id, chunks) = state.runner.start(messages).await?;
    state.registry.store_run_id(&session, run_id).await?;

    info!(session_id = %session, %run_id, messages = messages.len(), "started chat run");

    let binding = SessionBinding {
        session,
        registry: state.registry.clone(),
    };
    Ok(respond(chunks, run_id, Some(binding), state.stream_options))
}

/// POST /api/chat - Start a chat run and stream the assistant response
#[utoipa::path(
    post,
    path = "/api/chat",
    request_body = ChatRequest,
    params(
        ("x-session-id" = Option<String>, Header, description = "Session to continue; minted when absent")
    ),
    responses(
        (status = 200, description = "UI message stream (SSE); x-session-id and x-workflow-run-id headers identify the run", content_type = "text/event-stream"),
        (status = 400, description = "Malformed history", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "chat"
)]
pub async fn post_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    validate_history(&request.messages).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let session = resolve_session_id(&headers);
    start_run(&state, session, &request.messages).await
}

/// GET /api/chat/stream - Reconnect to the session's current run
#[utoipa::path(
    get,
    path = "/api/chat/stream",
    params(
        ("x-session-id" = String, Header, description = "Session to reconnect"),
        ("last-event-id" = Option<i64>, Header, description = "Offset of the last chunk received"),
        StreamQuery
    ),
    responses(
        (status = 200, description = "Remaining (or fresh) UI message stream", content_type = "text/event-stream"),
        (status = 400, description = "Missing session header", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "chat"
)]
pub async fn resume_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<StreamQuery>,
) -> Result<Response, ApiError> {
    let session = require_session(&headers)?;
    let from_offset = next_offset(resolve_cursor(&headers, &query));

    if let Some(run_id) = state.registry.get_run_id(&session).await? {
        match state.runner.attach(run_id, from_offset).await {
            Ok(chunks) => {
                info!(session_id = %session, %run_id, from_offset, "reattached to chat run");
                let binding = SessionBinding {
                    session,
                    registry: state.registry.clone(),
                };
                return Ok(respond(chunks, run_id, Some(binding), state.stream_options));
            }
            Err(RunnerError::NotFound(_)) => {
                warn!(session_id = %session, %run_id, "stored run is gone, starting fresh");
            }
            Err(e) => return Err(e.into()),
        }
    }

    let history = state
        .registry
        .get_history(&session)
        .await?
        .unwrap_or_default();
    info!(session_id = %session, messages = history.len(), "no resumable run, starting fresh");
    start_run(&state, session, &history).await
}

/// GET /api/chat/history - Stored history of the session
#[utoipa::path(
    get,
    path = "/api/chat/history",
    params(
        ("x-session-id" = String, Header, description = "Session to read")
    ),
    responses(
        (status = 200, description = "Stored messages (empty when none or expired)", body = ListResponse<UiMessage>),
        (status = 400, description = "Missing session header", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "chat"
)]
pub async fn chat_history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ListResponse<UiMessage>>, ApiError> {
    let session = require_session(&headers)?;
    let history = state
        .registry
        .get_history(&session)
        .await?
        .unwrap_or_default();
    Ok(Json(ListResponse::new(history)))
}

// Run stream route
//
// GET /api/runs/:run_id/stream  attach directly to a run by id
//
// Decision: Only streams the run; the session mapping is cleared on completion
//           when the caller also names the session

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Response,
    routing::get,
    Router,
};
use chatrun_durable::RunId;
use tracing::info;

use super::chat::{next_offset, resolve_cursor, StreamQuery};
use super::common::{ApiError, ErrorResponse};
use super::stream::{respond, SessionBinding};
use crate::session::session_from_headers;
use crate::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/runs/:run_id/stream", get(stream_run))
        .with_state(state)
}

/// GET /api/runs/{run_id}/stream - Stream a run from a cursor
#[utoipa::path(
    get,
    path = "/api/runs/{run_id}/stream",
    params(
        ("run_id" = uuid::Uuid, Path, description = "Workflow run ID"),
        ("x-session-id" = Option<String>, Header, description = "Session the run belongs to"),
        ("last-event-id" = Option<i64>, Header, description = "Offset of the last chunk received"),
        StreamQuery
    ),
    responses(
        (status = 200, description = "UI message stream (SSE) from the cursor", content_type = "text/event-stream"),
        (status = 404, description = "Run not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "runs"
)]
pub async fn stream_run(
    State(state): State<AppState>,
    Path(run_id): Path<RunId>,
    headers: HeaderMap,
    Query(query): Query<StreamQuery>,
) -> Result<Response, ApiError> {
    let from_offset = next_offset(resolve_cursor(&headers, &query));
    let chunks = state.runner.attach(run_id, from_offset).await?;

    info!(%run_id, from_offset, "attached to run");

    let binding = session_from_headers(&headers).map(|session| SessionBinding {
        session,
        registry: state.registry.clone(),
    });
    Ok(respond(chunks, run_id, binding, state.stream_options))
}

// Session resolver
// Decision: A client-supplied x-session-id is reused byte-for-byte, never rewritten
// Decision: Anything unusable (missing, empty, non-ASCII) means "no session" and a new id is minted

use axum::http::HeaderMap;
use chatrun_core::SessionId;

/// Request/response header carrying the session id
pub const SESSION_HEADER: &str = "x-session-id";

/// Response header carrying the run id
pub const WORKFLOW_RUN_HEADER: &str = "x-workflow-run-id";

/// Session id supplied by the client, if any
pub fn session_from_headers(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(SessionId::from_client)
}

/// Reuse the client's session id or mint a new one; cannot fail
pub fn resolve_session_id(headers: &HeaderMap) -> SessionId {
    session_from_headers(headers).unwrap_or_else(SessionId::mint)
}

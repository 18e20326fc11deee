// OpenAPI specification generation
//
// This module defines the OpenAPI spec for the chat API.
// It is served by the API server at /api-doc/openapi.json
// and printed by the export-openapi binary for static spec generation.

use crate::api;
use crate::api::ListResponse;
use chatrun_core::{MessageRole, UiMessage, UiMessageChunk};
use utoipa::OpenApi;

/// OpenAPI documentation for the chat API
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::health,
        api::chat::post_chat,
        api::chat::resume_chat,
        api::chat::chat_history,
        api::runs::stream_run,
    ),
    components(
        schemas(
            UiMessage, MessageRole,
            UiMessageChunk,
            api::chat::ChatRequest,
            api::ErrorResponse,
            ListResponse<UiMessage>,
            crate::HealthResponse,
        )
    ),
    tags(
        (name = "chat", description = "Resumable chat streaming endpoints (SSE)"),
        (name = "runs", description = "Direct access to workflow runs"),
        (name = "health", description = "Service health")
    ),
    info(
        title = "Chatrun API",
        version = "0.2.0",
        description = "Session-scoped, resumable chat streaming over the UI message stream protocol",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// The OpenAPI document
    pub fn spec() -> utoipa::openapi::OpenApi {
        Self::openapi()
    }

    /// Generate the OpenAPI spec as a pretty-printed JSON string
    pub fn to_json() -> Result<String, serde_json::Error> {
        Self::openapi().to_pretty_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_lists_chat_paths() {
        let json: serde_json::Value = serde_json::from_str(&ApiDoc::to_json().unwrap()).unwrap();
        let paths = json["paths"].as_object().unwrap();
        for path in [
            "/api/chat",
            "/api/chat/stream",
            "/api/chat/history",
            "/api/runs/{run_id}/stream",
            "/health",
        ] {
            assert!(paths.contains_key(path), "missing {}", path);
        }
    }
}

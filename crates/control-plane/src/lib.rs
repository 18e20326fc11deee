// Chatrun Control Plane Library
// Decision: Shared library for binaries (API server, OpenAPI export) and router tests
// Decision: One AppState for every route; the session registry and runner are cheap to clone

// API routes and types (shared for OpenAPI generation)
pub mod api;

// Environment-driven server settings
pub mod config;

// OpenAPI spec generation
pub mod openapi;

// Background reclamation of orphaned runs
pub mod reclaim;

// Session id resolution from request headers
pub mod session;

use axum::http::{header, HeaderName, Method, StatusCode};
use axum::{extract::State, routing::get, Json, Router};
use chatrun_core::{ChatRunner, SessionRegistry};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::ToSchema;

pub use api::StreamOptions;
pub use config::ServerConfig;

/// App state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub runner: ChatRunner,
    pub stream_options: StreamOptions,
    /// Name of the run ledger backend, reported by /health
    pub ledger_backend: &'static str,
}

impl AppState {
    pub fn new(registry: SessionRegistry, runner: ChatRunner, stream_options: StreamOptions) -> Self {
        Self {
            registry,
            runner,
            stream_options,
            ledger_backend: "memory",
        }
    }

    pub fn with_ledger_backend(mut self, backend: &'static str) -> Self {
        self.ledger_backend = backend;
        self
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// "ok" or "unavailable"
    pub store: String,
    pub ledger: String,
}

/// GET /health - Liveness plus session store reachability
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse),
        (status = 503, description = "Session store unreachable", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (status, code, store) = match state.registry.store().ping().await {
        Ok(()) => ("ok", StatusCode::OK, "ok"),
        Err(e) => {
            tracing::warn!(error = %e, "session store health check failed");
            ("degraded", StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    };
    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store: store.to_string(),
            ledger: state.ledger_backend.to_string(),
        }),
    )
}

/// Build router with optional API prefix (extracted for testing)
fn build_router_with_prefix<S: Clone + Send + Sync + 'static>(
    api_routes: Router<S>,
    api_prefix: &str,
) -> Router<S> {
    if api_prefix.is_empty() {
        api_routes
    } else {
        Router::new().nest(api_prefix, api_routes)
    }
}

/// Assemble the full application router
pub fn build_app(state: AppState, config: &ServerConfig) -> Router {
    let api_routes = Router::new()
        .merge(api::chat::routes(state.clone()))
        .merge(api::runs::routes(state.clone()));

    // Health and the OpenAPI document are never prefixed
    let app = Router::new()
        .route("/health", get(health).with_state(state))
        .route(
            "/api-doc/openapi.json",
            get(|| async { Json(openapi::ApiDoc::spec()) }),
        )
        .merge(build_router_with_prefix(api_routes, &config.api_prefix()));

    let cors_origins = config.cors_origins();
    let app = if cors_origins.is_empty() {
        tracing::info!("CORS not configured (same-origin requests only)");
        app
    } else {
        tracing::info!(origins = ?cors_origins, "CORS origins configured");
        app.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(cors_origins))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([
                    header::CONTENT_TYPE,
                    header::ACCEPT,
                    header::ORIGIN,
                    header::CACHE_CONTROL,
                    HeaderName::from_static(session::SESSION_HEADER),
                    HeaderName::from_static("last-event-id"),
                ])
                .expose_headers([
                    HeaderName::from_static(session::SESSION_HEADER),
                    HeaderName::from_static(session::WORKFLOW_RUN_HEADER),
                    HeaderName::from_static(api::UI_MESSAGE_STREAM_HEADER),
                ]),
        )
    };

    app.layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_routes() -> Router {
        Router::new().route("/api/test", get(|| async { "ok" }))
    }

    #[tokio::test]
    async fn test_api_prefix_empty() {
        let app = build_router_with_prefix(test_routes(), "");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_api_prefix_applied() {
        let app = build_router_with_prefix(test_routes(), "/v1");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/v1/api/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

// Server configuration
//
// All settings come from environment variables (after .env is loaded by main).
// Fields are optional; accessors apply defaults so tests can build a config with
// `ServerConfig::default()` and override only what they need.

use std::time::Duration;

use axum::http::HeaderValue;

use crate::api::stream::StreamOptions;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9000";
const DEFAULT_RECLAIM_INTERVAL_SECS: u64 = 30;

/// HTTP server configuration
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Listen address (BIND_ADDR)
    pub bind_addr: Option<String>,
    /// Prefix for API routes, e.g. "/v1" (API_PREFIX)
    pub api_prefix: Option<String>,
    /// Comma-separated allowed origins (CORS_ALLOWED_ORIGINS)
    pub cors_allowed_origins: Option<String>,
    /// Shared session store (REDIS_URL); in-memory when unset
    pub redis_url: Option<String>,
    /// PostgreSQL run ledger (DATABASE_URL); in-memory when unset
    pub database_url: Option<String>,
    /// Forward reasoning chunks to clients (SEND_REASONING)
    pub send_reasoning: Option<bool>,
    /// Forward source chunks to clients (SEND_SOURCES)
    pub send_sources: Option<bool>,
    /// Seconds between reclamation sweeps (RECLAIM_INTERVAL_SECS)
    pub reclaim_interval_secs: Option<u64>,
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl ServerConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_nonempty("BIND_ADDR"),
            api_prefix: env_nonempty("API_PREFIX"),
            cors_allowed_origins: env_nonempty("CORS_ALLOWED_ORIGINS"),
            redis_url: env_nonempty("REDIS_URL"),
            database_url: env_nonempty("DATABASE_URL"),
            send_reasoning: env_flag("SEND_REASONING"),
            send_sources: env_flag("SEND_SOURCES"),
            reclaim_interval_secs: std::env::var("RECLAIM_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }

    pub fn bind_addr(&self) -> &str {
        self.bind_addr.as_deref().unwrap_or(DEFAULT_BIND_ADDR)
    }

    /// API prefix normalized to "" or "/segment" (no trailing slash)
    pub fn api_prefix(&self) -> String {
        let trimmed = self
            .api_prefix
            .as_deref()
            .unwrap_or_default()
            .trim()
            .trim_end_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        }
    }

    /// Parsed CORS origins; invalid entries are skipped
    pub fn cors_origins(&self) -> Vec<HeaderValue> {
        self.cors_allowed_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect()
    }

    /// Chunk filtering applied by the stream responder (both default on)
    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            send_reasoning: self.send_reasoning.unwrap_or(true),
            send_sources: self.send_sources.unwrap_or(true),
        }
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(
            self.reclaim_interval_secs
                .unwrap_or(DEFAULT_RECLAIM_INTERVAL_SECS)
                .max(1),
        )
    }
}

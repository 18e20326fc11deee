// Session registry
// Decision: Owns the key layout and TTL; callers never build store keys themselves
// Decision: Corrupt stored values are logged and treated as absent
//
// Key layout (each with the same TTL, reset on every write):
//   {prefix}history:{sessionId} -> JSON array of UiMessage
//   {prefix}run:{sessionId}     -> run id of the most recent run

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::message::UiMessage;
use crate::session::SessionId;
use crate::store::{SessionStore, StoreError};
use chatrun_durable::RunId;

/// Default retention of session keys (24 hours)
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(86_400);

/// Configuration for the session registry
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Key retention in seconds (SESSION_TTL_SECS)
    pub ttl_secs: Option<u64>,
    /// Prefix prepended to every key (SESSION_KEY_PREFIX)
    pub key_prefix: Option<String>,
}

impl RegistryConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            ttl_secs: std::env::var("SESSION_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok()),
            key_prefix: std::env::var("SESSION_KEY_PREFIX").ok(),
        }
    }

    /// Key TTL with default
    pub fn ttl(&self) -> Duration {
        self.ttl_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SESSION_TTL)
    }

    /// Key prefix with default (empty)
    pub fn key_prefix(&self) -> &str {
        self.key_prefix.as_deref().unwrap_or("")
    }
}

/// Typed access to per-session history and run mapping
#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    ttl: Duration,
    prefix: String,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SessionStore>, config: &RegistryConfig) -> Self {
        Self {
            store,
            ttl: config.ttl(),
            prefix: config.key_prefix().to_string(),
        }
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Key holding the session's message history
    pub fn history_key(&self, session: &SessionId) -> String {
        format!("{}history:{}", self.prefix, session)
    }

    /// Key holding the session's current run id
    pub fn run_key(&self, session: &SessionId) -> String {
        format!("{}run:{}", self.prefix, session)
    }

    /// Overwrite the stored history
    pub async fn store_history(
        &self,
        session: &SessionId,
        messages: &[UiMessage],
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(messages)
            .map_err(|e| StoreError::Unavailable(format!("failed to encode history: {}", e)))?;
        self.store.put(&self.history_key(session), json, self.ttl).await?;
        debug!(session_id = %session, messages = messages.len(), "stored history");
        Ok(())
    }

    /// Load the stored history; `None` if absent, expired or unreadable
    pub async fn get_history(
        &self,
        session: &SessionId,
    ) -> Result<Option<Vec<UiMessage>>, StoreError> {
        let Some(json) = self.store.get(&self.history_key(session)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&json) {
            Ok(messages) => Ok(Some(messages)),
            Err(e) => {
                warn!(session_id = %session, error = %e, "ignoring corrupt stored history");
                Ok(None)
            }
        }
    }

    /// Record the session's most recent run (last write wins)
    pub async fn store_run_id(&self, session: &SessionId, run_id: RunId) -> Result<(), StoreError> {
        self.store
            .put(&self.run_key(session), run_id.to_string(), self.ttl)
            .await?;
        debug!(session_id = %session, %run_id, "stored run id");
        Ok(())
    }

    /// The session's most recent run; `None` if absent, expired or unreadable
    pub async fn get_run_id(&self, session: &SessionId) -> Result<Option<RunId>, StoreError> {
        let Some(raw) = self.store.get(&self.run_key(session)).await? else {
            return Ok(None);
        };
        match raw.parse() {
            Ok(run_id) => Ok(Some(run_id)),
            Err(e) => {
                warn!(session_id = %session, error = %e, "ignoring corrupt stored run id");
                Ok(None)
            }
        }
    }

    /// Forget the session's run mapping unconditionally
    pub async fn delete_run_id(&self, session: &SessionId) -> Result<(), StoreError> {
        self.store.delete(&self.run_key(session)).await
    }

    /// Forget the run mapping only if it still points at `run_id`
    ///
    /// A newer run started for the same session is never cleared by a reader
    /// that finished consuming an older one.
    pub async fn clear_run_id_if(
        &self,
        session: &SessionId,
        run_id: RunId,
    ) -> Result<bool, StoreError> {
        let cleared = self
            .store
            .delete_if_eq(&self.run_key(session), &run_id.to_string())
            .await?;
        debug!(session_id = %session, %run_id, cleared, "cleared run id");
        Ok(cleared)
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("backend", &self.store.backend())
            .field("ttl", &self.ttl)
            .field("prefix", &self.prefix)
            .finish()
    }
}

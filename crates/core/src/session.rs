// Session identity
//
// A SessionId names one client-side conversation. Ids supplied by the client
// are kept byte-for-byte; ids minted here are `session_` plus a UUID v7 in
// simple form, unique without any coordination between processes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix of server-minted session ids
pub const SESSION_ID_PREFIX: &str = "session_";

/// Opaque, client-visible conversation identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Mint a new session id
    pub fn mint() -> Self {
        Self(format!("{}{}", SESSION_ID_PREFIX, Uuid::now_v7().simple()))
    }

    /// Accept a client-supplied id; empty or all-whitespace values count as absent
    pub fn from_client(value: &str) -> Option<Self> {
        if value.trim().is_empty() {
            None
        } else {
            Some(Self(value.to_string()))
        }
    }

    /// The id as sent on the wire
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

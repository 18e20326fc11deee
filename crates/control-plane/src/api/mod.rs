// HTTP API routes
//
// This module contains all HTTP route handlers for the public API.
// All handlers share the crate-level AppState.

pub mod chat;
pub mod common;
pub mod runs;
pub mod stream;

// Re-export common types
pub use common::{ApiError, ErrorResponse, ListResponse};
pub use stream::{StreamOptions, UI_MESSAGE_STREAM_HEADER};

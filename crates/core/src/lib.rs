// Chat Core
//
// This crate holds everything about a resumable chat that is independent of
// HTTP: the UI message and chunk wire types, session identity, the key-value
// session registry, the language model and tool abstractions, and the chat
// agent that runs as a durable workflow on top of chatrun-durable.
//
// Key design decisions:
// - Uses traits (SessionStore, LanguageModel, Tool) for pluggable backends
// - The agent writes chunks to a run ledger, never to a connection
// - Readers (first or reconnecting) consume the same ledger by offset
// - Session keys expire; a lost mapping falls back to a fresh run

pub mod agent;
pub mod chunk;
pub mod message;
pub mod model;
pub mod registry;
pub mod runner;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod tools;

// Re-exports for convenience
pub use agent::{AgentConfig, ChatWorkflow, ChatWorkflowInput, CHAT_WORKFLOW_TYPE};
pub use chunk::{UiMessageChunk, GENERIC_ERROR_TEXT};
pub use message::{
    validate_history, HistoryError, MessagePart, MessageRole, ToolPart, ToolState, UiMessage,
};
pub use model::{
    EchoModel, LanguageModel, ModelError, ModelEvent, ModelEventStream, ModelMessage,
    ModelRequest, OpenAiCompatibleModel, OpenAiConfig, ScriptedModel, ScriptedStep, ToolCall,
    ToolDefinition,
};
pub use registry::{RegistryConfig, SessionRegistry, DEFAULT_SESSION_TTL};
pub use runner::{ChatChunk, ChatRunner, ChatStream, StreamError};
pub use session::{SessionId, SESSION_ID_PREFIX};
pub use store::{InMemorySessionStore, SessionStore, StoreError};
#[cfg(feature = "redis")]
pub use store::RedisSessionStore;
pub use tools::{
    GetCurrentDatetimeTool, Tool, ToolExecutionResult, ToolOutcome, ToolRegistry,
    ToolRegistryBuilder,
};

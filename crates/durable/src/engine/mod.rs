//! Run execution engine
//!
//! - [`WorkflowRunner`] starts runs detached from the caller and attaches readers
//! - [`ChunkWriter`] is the only way a running workflow emits output
//! - [`ChunkStream`] replays a run from an offset and then follows it live

mod registry;
mod runner;
mod stream;
mod writer;

pub use registry::WorkflowRegistry;
pub use runner::{RunnerConfig, RunnerError, WorkflowRunner};
pub use stream::{ChunkStream, RunChunk};
pub use writer::ChunkWriter;

//! Workflow abstractions
//!
//! A [`Workflow`] is an async computation that writes its output as an ordered
//! sequence of JSON chunks through a [`ChunkWriter`](crate::ChunkWriter). It runs
//! detached from whoever started it; readers only ever see the ledger.

mod definition;

pub use definition::{Workflow, WorkflowError};

//! Persistence layer for run ledgers
//!
//! This module provides:
//! - [`RunLedger`] trait for run and chunk persistence
//! - [`InMemoryRunLedger`] for dev mode and testing
//! - [`PostgresRunLedger`] for production (shared across processes)

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryRunLedger;
pub use postgres::PostgresRunLedger;
pub use store::{LedgerError, RunInfo, RunLedger, RunStatus};

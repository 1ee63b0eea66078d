//! Storage backends implementing `pipeline_core::storage::Storage`.
//!
//! Two conforming implementations are provided: an ephemeral in-memory
//! store for tests and short-lived hosts, and a SQLite-backed document
//! store for durable deployments.

pub mod error;
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use error::{Result, StorageError};
pub use memory::InMemoryStorage;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

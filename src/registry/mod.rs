//! Durable store of machine records.
//!
//! The registry is the source of truth for VM state. Every call is atomic on
//! its own; callers that read then write must revalidate in between.

mod sqlite;

pub use sqlite::SqliteRegistry;

use crate::machine::Machine;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("machine {0} not found")]
    NotFound(String),

    #[error("machine {id} was modified concurrently (expected revision {expected})")]
    Conflict { id: String, expected: u32 },

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("schema migration failed: {0}")]
    Migration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait MachineRegistry: Send + Sync {
    fn list(&self) -> Result<Vec<Machine>, RegistryError>;

    /// `Ok(None)` when no record has this id
    fn get(&self, id: &str) -> Result<Option<Machine>, RegistryError>;

    fn insert(&self, machine: &Machine) -> Result<(), RegistryError>;

    /// Replace the record for `id` with `machine`.
    ///
    /// `machine.version` must be exactly one past the stored revision;
    /// anything else means somebody else wrote first and yields `Conflict`.
    fn update(&self, id: &str, machine: &Machine) -> Result<(), RegistryError>;

    fn delete(&self, id: &str) -> Result<(), RegistryError>;
}

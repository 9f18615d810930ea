//! Narrow interface over the virtualization tool.
//!
//! The fleet controller never spawns processes itself; everything goes
//! through a [`VmBackend`]. [`VagrantCli`] is the real implementation and
//! [`FakeBackend`] an in-memory stand-in for tests.

pub mod fake;
mod output;
mod vagrant;

pub use fake::FakeBackend;
pub use output::{InstalledBox, MachineReadableLine};
pub use vagrant::VagrantCli;

use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with status {code}: {stderr}")]
    Exit {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("`{command}` timed out after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },

    #[error("malformed output: {0}")]
    MalformedOutput(String),

    #[error("machine at {0} is not running after boot")]
    NotRunning(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One entry of a machine directory's status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineStatus {
    pub name: String,
    pub state: String,
}

impl MachineStatus {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// Operations the fleet controller needs from the virtualization tool.
///
/// `path` is the machine's working directory. Every call may block for
/// minutes and must fail with a `BackendError` instead of hanging or
/// panicking.
pub trait VmBackend: Send + Sync {
    /// Whether a machine definition already exists at `path`
    fn exists(&self, path: &Path) -> bool;

    /// Write a machine definition for `box_name` into `path`
    fn initialize(&self, path: &Path, box_name: &str) -> Result<(), BackendError>;

    fn boot(&self, path: &Path) -> Result<(), BackendError>;

    fn status(&self, path: &Path) -> Result<Vec<MachineStatus>, BackendError>;

    /// Take a named snapshot and return its id
    fn snapshot(&self, path: &Path, label: &str) -> Result<String, BackendError>;

    fn restore_snapshot(&self, path: &Path, snapshot_id: &str) -> Result<(), BackendError>;

    /// Power the machine off, keeping its disks and snapshots
    fn halt(&self, path: &Path) -> Result<(), BackendError>;

    fn destroy(&self, path: &Path) -> Result<(), BackendError>;
}

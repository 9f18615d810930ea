//! Free-memory source used by admission control.

mod jenkins;

pub use jenkins::JenkinsMonitor;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("undecodable response: {0}")]
    Decode(String),

    #[error("controller node not found in computer list")]
    NodeMissing,

    #[error("controller node does not report available physical memory")]
    MemoryUnreported,

    #[error("{0}")]
    Unavailable(String),
}

/// Reports currently available physical memory on the VM host, in bytes.
pub trait CapacityOracle: Send + Sync {
    fn free_memory(&self) -> Result<u64, OracleError>;
}

/// Oracle with a settable answer
#[derive(Debug, Default)]
pub struct FixedCapacity {
    free: AtomicU64,
    failing: AtomicBool,
}

impl FixedCapacity {
    pub fn new(free: u64) -> Self {
        Self {
            free: AtomicU64::new(free),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_free(&self, free: u64) {
        self.free.store(free, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl CapacityOracle for FixedCapacity {
    fn free_memory(&self) -> Result<u64, OracleError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(OracleError::Unavailable(
                "capacity source switched off".to_string(),
            ));
        }
        Ok(self.free.load(Ordering::SeqCst))
    }
}

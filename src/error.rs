use crate::backend::BackendError;
use crate::capacity::OracleError;
use crate::machine::MachineState;
use crate::registry::RegistryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentManagerError {
    #[error("No box configured for label: {label}")]
    BoxNotFound { label: String },

    #[error("Too many vms are running: {allowed} allowed, {requested} requested")]
    TooManyVms { allowed: usize, requested: usize },

    #[error("Not enough system memory available: {free} bytes free, {required} bytes required")]
    NoFreeMemory { free: u64, required: u64 },

    #[error("Machine not found: {0}")]
    MachineNotFound(String),

    #[error("Machine {id} is {current}, operation requires {required}")]
    InvalidState {
        id: String,
        current: MachineState,
        required: MachineState,
    },

    #[error("Machine {0} is busy with another operation")]
    MachineBusy(String),

    #[error("Vagrant failed to {operation}: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("Capacity oracle unavailable: {source}")]
    OracleUnavailable {
        #[source]
        source: OracleError,
    },

    #[error("Machine registry failed to {operation}: {source}")]
    Persistence {
        operation: &'static str,
        #[source]
        source: RegistryError,
    },

    #[error("Vagrant not installed. Install from https://www.vagrantup.com")]
    VagrantNotInstalled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config parse error: {0}")]
    ConfigJson(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentManagerError {
    pub(crate) fn backend(operation: &'static str, source: BackendError) -> Self {
        AgentManagerError::Backend { operation, source }
    }

    pub(crate) fn persistence(operation: &'static str, source: RegistryError) -> Self {
        AgentManagerError::Persistence { operation, source }
    }

    /// Whether a caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentManagerError::TooManyVms { .. }
                | AgentManagerError::NoFreeMemory { .. }
                | AgentManagerError::MachineBusy(_)
                | AgentManagerError::Backend { .. }
                | AgentManagerError::OracleUnavailable { .. }
                | AgentManagerError::Persistence { .. }
        )
    }

    /// Whether the request itself was wrong (unknown label or id, wrong state).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AgentManagerError::BoxNotFound { .. }
                | AgentManagerError::MachineNotFound(_)
                | AgentManagerError::InvalidState { .. }
        )
    }
}

impl From<OracleError> for AgentManagerError {
    fn from(source: OracleError) -> Self {
        AgentManagerError::OracleUnavailable { source }
    }
}

pub type Result<T> = std::result::Result<T, AgentManagerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_many_vms_message() {
        let err = AgentManagerError::TooManyVms {
            allowed: 1,
            requested: 1,
        };
        assert_eq!(
            err.to_string(),
            "Too many vms are running: 1 allowed, 1 requested"
        );
        assert!(err.is_retryable());
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_invalid_state_is_client_error() {
        let err = AgentManagerError::InvalidState {
            id: "abc".to_string(),
            current: MachineState::Unused,
            required: MachineState::Running,
        };
        assert_eq!(
            err.to_string(),
            "Machine abc is unused, operation requires running"
        );
        assert!(err.is_client_error());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_backend_error_keeps_source() {
        use std::error::Error as _;

        let err = AgentManagerError::backend(
            "boot",
            BackendError::Timeout {
                command: "vagrant up".to_string(),
                timeout_secs: 5,
            },
        );
        assert!(err.is_retryable());
        assert!(err.source().is_some());
        assert!(err.to_string().contains("vagrant up"));
    }
}

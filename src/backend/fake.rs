//! In-memory [`VmBackend`] for tests.

use super::{BackendError, MachineStatus, VmBackend};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Initialize,
    Boot,
    Status,
    Snapshot,
    Restore,
    Halt,
    Destroy,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Initialize => "init",
            Operation::Boot => "up",
            Operation::Status => "status",
            Operation::Snapshot => "snapshot save",
            Operation::Restore => "snapshot restore",
            Operation::Halt => "halt",
            Operation::Destroy => "destroy",
        };
        f.write_str(name)
    }
}

/// One recorded backend invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: Operation,
    pub path: PathBuf,
}

#[derive(Debug, Default)]
struct FakeMachine {
    box_name: String,
    running: bool,
    snapshots: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    machines: HashMap<PathBuf, FakeMachine>,
    calls: Vec<Call>,
    failures: HashSet<Operation>,
    boots_stopped: bool,
    snapshot_seq: u64,
}

/// Backend that keeps machines in a map keyed by working directory.
///
/// Failures are injected per operation with [`FakeBackend::fail_on`]; every
/// call (failed or not) lands in the call log.
#[derive(Debug, Default)]
pub struct FakeBackend {
    state: Mutex<State>,
    boot_delay: Option<Duration>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `boot` take `delay`, widening race windows in tests.
    pub fn with_boot_delay(delay: Duration) -> Self {
        Self {
            boot_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Fail every future call of `operation` until cleared
    pub fn fail_on(&self, operation: Operation) {
        self.lock().failures.insert(operation);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Boots succeed but the machine reports itself powered off
    pub fn set_boots_stopped(&self, stopped: bool) {
        self.lock().boots_stopped = stopped;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.lock().calls.iter().map(|c| c.operation).collect()
    }

    pub fn call_count(&self, operation: Operation) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn is_running(&self, path: &Path) -> bool {
        self.lock()
            .machines
            .get(path)
            .is_some_and(|machine| machine.running)
    }

    pub fn running_count(&self) -> usize {
        self.lock().machines.values().filter(|m| m.running).count()
    }

    /// Machines that currently exist (running or not)
    pub fn machine_count(&self) -> usize {
        self.lock().machines.len()
    }

    pub fn box_name(&self, path: &Path) -> Option<String> {
        self.lock().machines.get(path).map(|m| m.box_name.clone())
    }

    pub fn snapshots(&self, path: &Path) -> Vec<String> {
        self.lock()
            .machines
            .get(path)
            .map(|m| m.snapshots.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Log the call and return the guard, or the injected failure.
    fn enter(&self, operation: Operation, path: &Path) -> Result<MutexGuard<'_, State>, BackendError> {
        let mut state = self.lock();
        state.calls.push(Call {
            operation,
            path: path.to_path_buf(),
        });

        if state.failures.contains(&operation) {
            return Err(BackendError::Exit {
                command: format!("vagrant {}", operation),
                code: 1,
                stderr: "injected failure".to_string(),
            });
        }
        Ok(state)
    }
}

fn missing(operation: Operation, path: &Path) -> BackendError {
    BackendError::Exit {
        command: format!("vagrant {}", operation),
        code: 1,
        stderr: format!("no machine defined in {}", path.display()),
    }
}

impl VmBackend for FakeBackend {
    fn exists(&self, path: &Path) -> bool {
        self.lock().machines.contains_key(path)
    }

    fn initialize(&self, path: &Path, box_name: &str) -> Result<(), BackendError> {
        let mut state = self.enter(Operation::Initialize, path)?;
        state.machines.insert(
            path.to_path_buf(),
            FakeMachine {
                box_name: box_name.to_string(),
                ..FakeMachine::default()
            },
        );
        Ok(())
    }

    fn boot(&self, path: &Path) -> Result<(), BackendError> {
        drop(self.enter(Operation::Boot, path)?);

        if let Some(delay) = self.boot_delay {
            std::thread::sleep(delay);
        }

        let mut state = self.lock();
        let stopped = state.boots_stopped;
        let machine = state
            .machines
            .get_mut(path)
            .ok_or_else(|| missing(Operation::Boot, path))?;
        machine.running = !stopped;
        Ok(())
    }

    fn status(&self, path: &Path) -> Result<Vec<MachineStatus>, BackendError> {
        let state = self.enter(Operation::Status, path)?;
        let status = match state.machines.get(path) {
            Some(machine) if machine.running => "running",
            Some(_) => "poweroff",
            None => "not_created",
        };
        Ok(vec![MachineStatus {
            name: "default".to_string(),
            state: status.to_string(),
        }])
    }

    fn snapshot(&self, path: &Path, label: &str) -> Result<String, BackendError> {
        let mut state = self.enter(Operation::Snapshot, path)?;
        state.snapshot_seq += 1;
        let name = format!("{}-baseline-{}", label, state.snapshot_seq);

        let machine = state
            .machines
            .get_mut(path)
            .ok_or_else(|| missing(Operation::Snapshot, path))?;
        machine.snapshots.push(name.clone());
        Ok(name)
    }

    fn restore_snapshot(&self, path: &Path, snapshot_id: &str) -> Result<(), BackendError> {
        let mut state = self.enter(Operation::Restore, path)?;
        let machine = state
            .machines
            .get_mut(path)
            .ok_or_else(|| missing(Operation::Restore, path))?;

        if !machine.snapshots.iter().any(|s| s == snapshot_id) {
            return Err(BackendError::Exit {
                command: format!("vagrant {}", Operation::Restore),
                code: 1,
                stderr: format!("snapshot {} not found", snapshot_id),
            });
        }
        // --no-start
        machine.running = false;
        Ok(())
    }

    fn halt(&self, path: &Path) -> Result<(), BackendError> {
        let mut state = self.enter(Operation::Halt, path)?;
        let machine = state
            .machines
            .get_mut(path)
            .ok_or_else(|| missing(Operation::Halt, path))?;
        machine.running = false;
        Ok(())
    }

    fn destroy(&self, path: &Path) -> Result<(), BackendError> {
        let mut state = self.enter(Operation::Destroy, path)?;
        state
            .machines
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| missing(Operation::Destroy, path))
    }
}

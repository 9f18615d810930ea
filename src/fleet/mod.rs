//! Fleet lifecycle: admission, provisioning, reuse and teardown of agent VMs.
//!
//! The controller is synchronous and safe to share between threads. Every
//! backend call may block for minutes, so async callers must run it on a
//! blocking pool.

mod admission;

use crate::backend::{BackendError, VmBackend};
use crate::capacity::CapacityOracle;
use crate::catalog::{BoxCatalog, BoxDefinition};
use crate::error::{AgentManagerError, Result};
use crate::machine::{Machine, MachineState};
use crate::registry::MachineRegistry;
use admission::{Admission, Placement};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct FleetController {
    catalog: BoxCatalog,
    working_dir: PathBuf,
    backend: Arc<dyn VmBackend>,
    oracle: Arc<dyn CapacityOracle>,
    registry: Arc<dyn MachineRegistry>,
    admission: Admission,
}

impl FleetController {
    pub fn new(
        catalog: BoxCatalog,
        max_vm_count: usize,
        working_dir: PathBuf,
        backend: Arc<dyn VmBackend>,
        oracle: Arc<dyn CapacityOracle>,
        registry: Arc<dyn MachineRegistry>,
    ) -> Self {
        Self {
            catalog,
            working_dir,
            backend,
            oracle,
            registry,
            admission: Admission::new(max_vm_count),
        }
    }

    pub fn catalog(&self) -> &BoxCatalog {
        &self.catalog
    }

    pub fn max_vm_count(&self) -> usize {
        self.admission.max_vm_count()
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Bring up a build agent for `label`, reusing an idle machine when one
    /// with a baseline snapshot exists.
    pub fn start_agent(&self, label: &str) -> Result<Machine> {
        let definition = self
            .catalog
            .lookup(label)
            .ok_or_else(|| AgentManagerError::BoxNotFound {
                label: label.to_string(),
            })?;

        // Held until the registry write below has committed
        let (_reservation, placement) = self.admission.admit(
            definition,
            label,
            self.registry.as_ref(),
            self.oracle.as_ref(),
        )?;

        match placement {
            Placement::Reuse {
                machine,
                snapshot_id,
            } => self.resume(machine, &snapshot_id),
            Placement::Provision => self.provision(definition, label),
        }
    }

    /// Release a running agent: power it off when it has a baseline
    /// snapshot, destroy it otherwise.
    pub fn stop_agent(&self, id: &str) -> Result<Machine> {
        let _claim = match self.admission.claim(id) {
            Ok(claim) => claim,
            Err(busy) => {
                // A machine being reused is still recorded as Unused
                require_running(self.load(id)?)?;
                return Err(busy);
            }
        };
        let mut machine = require_running(self.load(id)?)?;

        let dir = machine.working_dir(&self.working_dir);
        if machine.snapshot_id.is_some() {
            info!(id, label = %machine.label, "Halting machine for reuse");
            self.backend
                .halt(&dir)
                .map_err(|e| AgentManagerError::backend("halt", e))?;
            machine.transition(MachineState::Unused);
        } else {
            info!(id, label = %machine.label, "Destroying machine without snapshot");
            // Gone already when an earlier stop failed to record its result
            if self.backend.exists(&dir) {
                self.backend
                    .destroy(&dir)
                    .map_err(|e| AgentManagerError::backend("destroy", e))?;
            }
            remove_dir(&dir);
            machine.transition(MachineState::Destroyed);
        }

        self.registry.update(id, &machine).map_err(|e| {
            error!(id, error = %e, "VM stopped but its record could not be updated");
            AgentManagerError::persistence("record stopped machine", e)
        })?;

        Ok(machine)
    }

    /// Forget an idle or destroyed machine, destroying its VM first when it
    /// still exists.
    pub fn delete_machine(&self, id: &str) -> Result<Machine> {
        let _claim = self.admission.claim(id)?;
        let machine = self.load(id)?;
        let dir = machine.working_dir(&self.working_dir);

        match machine.state {
            MachineState::Unused => {
                info!(id, label = %machine.label, "Destroying idle machine");
                if self.backend.exists(&dir) {
                    self.backend
                        .destroy(&dir)
                        .map_err(|e| AgentManagerError::backend("destroy", e))?;
                }
                remove_dir(&dir);
            }
            MachineState::Destroyed => remove_dir(&dir),
            current => {
                return Err(AgentManagerError::InvalidState {
                    id: machine.id,
                    current,
                    required: MachineState::Unused,
                })
            }
        }

        self.registry
            .delete(id)
            .map_err(|e| AgentManagerError::persistence("delete machine", e))?;

        info!(id, "Deleted machine record");
        Ok(machine)
    }

    pub fn list_machines(&self) -> Result<Vec<Machine>> {
        self.registry
            .list()
            .map_err(|e| AgentManagerError::persistence("list machines", e))
    }

    fn load(&self, id: &str) -> Result<Machine> {
        self.registry
            .get(id)
            .map_err(|e| AgentManagerError::persistence("load machine", e))?
            .ok_or_else(|| AgentManagerError::MachineNotFound(id.to_string()))
    }

    fn provision(&self, definition: &BoxDefinition, label: &str) -> Result<Machine> {
        let mut machine = Machine::provision(label);
        let dir = machine.working_dir(&self.working_dir);

        info!(
            id = %machine.id,
            label,
            box_name = %definition.name,
            "Provisioning new machine"
        );

        match self.create_vm(&dir, &definition.name, label) {
            Ok(snapshot) => machine.snapshot_id = Some(snapshot),
            Err(e) => {
                warn!(id = %machine.id, error = %e, "Provisioning failed, rolling back");
                self.discard(&dir);
                return Err(e);
            }
        }

        machine.transition(MachineState::Running);
        if let Err(e) = self.registry.insert(&machine) {
            error!(id = %machine.id, error = %e, "Could not record new machine, destroying it");
            self.discard(&dir);
            return Err(AgentManagerError::persistence("record new machine", e));
        }

        info!(
            id = %machine.id,
            label,
            snapshot = machine.snapshot_id.as_deref().unwrap_or_default(),
            "Machine running"
        );
        Ok(machine)
    }

    fn create_vm(&self, dir: &Path, box_name: &str, label: &str) -> Result<String> {
        std::fs::create_dir_all(dir)
            .map_err(|e| AgentManagerError::backend("prepare working directory", e.into()))?;

        if !self.backend.exists(dir) {
            self.backend
                .initialize(dir, box_name)
                .map_err(|e| AgentManagerError::backend("initialize", e))?;
        }
        self.backend
            .boot(dir)
            .map_err(|e| AgentManagerError::backend("boot", e))?;
        self.ensure_running(dir)?;

        self.backend
            .snapshot(dir, label)
            .map_err(|e| AgentManagerError::backend("snapshot", e))
    }

    fn resume(&self, mut machine: Machine, snapshot_id: &str) -> Result<Machine> {
        let dir = machine.working_dir(&self.working_dir);
        info!(id = %machine.id, label = %machine.label, snapshot = snapshot_id, "Reusing idle machine");

        if let Err(e) = self.restore(&dir, snapshot_id) {
            warn!(id = %machine.id, error = %e, "Reuse failed, leaving machine idle");
            self.power_off(&dir);
            return Err(e);
        }

        machine.transition(MachineState::Running);
        if let Err(e) = self.registry.update(&machine.id, &machine) {
            error!(id = %machine.id, error = %e, "Could not record reused machine, halting it");
            self.power_off(&dir);
            return Err(AgentManagerError::persistence("record reused machine", e));
        }

        info!(id = %machine.id, label = %machine.label, "Machine running");
        Ok(machine)
    }

    fn restore(&self, dir: &Path, snapshot_id: &str) -> Result<()> {
        self.backend
            .restore_snapshot(dir, snapshot_id)
            .map_err(|e| AgentManagerError::backend("restore snapshot", e))?;
        self.backend
            .boot(dir)
            .map_err(|e| AgentManagerError::backend("boot", e))?;
        self.ensure_running(dir)
    }

    fn ensure_running(&self, dir: &Path) -> Result<()> {
        let statuses = self
            .backend
            .status(dir)
            .map_err(|e| AgentManagerError::backend("query status", e))?;

        if statuses.iter().any(|s| s.is_running()) {
            Ok(())
        } else {
            Err(AgentManagerError::backend(
                "boot",
                BackendError::NotRunning(dir.display().to_string()),
            ))
        }
    }

    /// Best-effort teardown of a machine that never made it into the registry
    fn discard(&self, dir: &Path) {
        if self.backend.exists(dir) {
            if let Err(e) = self.backend.destroy(dir) {
                warn!(dir = %dir.display(), error = %e, "Failed to destroy machine");
            }
        }
        remove_dir(dir);
    }

    /// Best-effort halt of a reused machine that must stay idle
    fn power_off(&self, dir: &Path) {
        if let Err(e) = self.backend.halt(dir) {
            warn!(dir = %dir.display(), error = %e, "Failed to halt machine");
        }
    }
}

fn require_running(machine: Machine) -> Result<Machine> {
    if machine.state != MachineState::Running {
        return Err(AgentManagerError::InvalidState {
            id: machine.id,
            current: machine.state,
            required: MachineState::Running,
        });
    }
    Ok(machine)
}

fn remove_dir(dir: &Path) {
    if dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(dir) {
            warn!(dir = %dir.display(), error = %e, "Failed to remove working directory");
        }
    }
}

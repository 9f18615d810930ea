use crate::capacity::CapacityOracle;
use crate::catalog::BoxDefinition;
use crate::error::{AgentManagerError, Result};
use crate::machine::{Machine, MachineState};
use crate::registry::MachineRegistry;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Where an admitted start will run
#[derive(Debug)]
pub(crate) enum Placement {
    /// Restore an idle machine from its baseline snapshot
    Reuse { machine: Machine, snapshot_id: String },
    /// Provision a new machine
    Provision,
}

/// Starts and per-machine operations that have been admitted but not yet
/// committed to the registry.
#[derive(Debug, Default)]
struct Ledger {
    in_flight: usize,
    reserved_memory: u64,
    claimed: HashSet<String>,
}

/// Serialises the capacity check with the placement decision so concurrent
/// starts can never oversubscribe slots or memory.
#[derive(Debug)]
pub(crate) struct Admission {
    max_vm_count: usize,
    ledger: Mutex<Ledger>,
}

impl Admission {
    pub fn new(max_vm_count: usize) -> Self {
        Self {
            max_vm_count,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    pub fn max_vm_count(&self) -> usize {
        self.max_vm_count
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Check slots and memory for `definition`, choose a placement and
    /// reserve both under one lock.
    pub fn admit(
        &self,
        definition: &BoxDefinition,
        label: &str,
        registry: &dyn MachineRegistry,
        oracle: &dyn CapacityOracle,
    ) -> Result<(Reservation<'_>, Placement)> {
        let mut ledger = self.lock();

        let machines = registry
            .list()
            .map_err(|e| AgentManagerError::persistence("list machines", e))?;
        let occupied = machines.iter().filter(|m| m.state.occupies_slot()).count();

        if occupied + ledger.in_flight + 1 > self.max_vm_count {
            return Err(AgentManagerError::TooManyVms {
                allowed: self.max_vm_count,
                requested: 1,
            });
        }

        let free = oracle
            .free_memory()?
            .saturating_sub(ledger.reserved_memory);
        if definition.memory_bytes >= free {
            return Err(AgentManagerError::NoFreeMemory {
                free,
                required: definition.memory_bytes,
            });
        }

        let idle = machines.into_iter().find_map(|machine| {
            if machine.state != MachineState::Unused
                || machine.label != label
                || ledger.claimed.contains(&machine.id)
            {
                return None;
            }
            let snapshot_id = machine.snapshot_id.clone()?;
            Some((machine, snapshot_id))
        });

        let claimed_id = idle.as_ref().map(|(machine, _)| machine.id.clone());
        if let Some(id) = &claimed_id {
            ledger.claimed.insert(id.clone());
        }
        ledger.in_flight += 1;
        ledger.reserved_memory += definition.memory_bytes;

        debug!(
            label,
            occupied,
            in_flight = ledger.in_flight,
            free,
            required = definition.memory_bytes,
            reuse = ?claimed_id,
            "Admitted start"
        );

        let placement = match idle {
            Some((machine, snapshot_id)) => Placement::Reuse {
                machine,
                snapshot_id,
            },
            None => Placement::Provision,
        };

        Ok((
            Reservation {
                admission: self,
                memory: definition.memory_bytes,
                claimed_id,
            },
            placement,
        ))
    }

    /// Exclusive right to operate on machine `id`
    pub fn claim(&self, id: &str) -> Result<Claim<'_>> {
        let mut ledger = self.lock();
        if !ledger.claimed.insert(id.to_string()) {
            return Err(AgentManagerError::MachineBusy(id.to_string()));
        }
        Ok(Claim {
            admission: self,
            id: id.to_string(),
        })
    }

    #[cfg(test)]
    fn in_flight(&self) -> (usize, u64, usize) {
        let ledger = self.lock();
        (ledger.in_flight, ledger.reserved_memory, ledger.claimed.len())
    }
}

/// An admitted start; releases its slot and memory when dropped.
#[derive(Debug)]
pub(crate) struct Reservation<'a> {
    admission: &'a Admission,
    memory: u64,
    claimed_id: Option<String>,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        let mut ledger = self.admission.lock();
        ledger.in_flight = ledger.in_flight.saturating_sub(1);
        ledger.reserved_memory = ledger.reserved_memory.saturating_sub(self.memory);
        if let Some(id) = &self.claimed_id {
            ledger.claimed.remove(id);
        }
    }
}

#[derive(Debug)]
pub(crate) struct Claim<'a> {
    admission: &'a Admission,
    id: String,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.admission.lock().claimed.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::FixedCapacity;
    use crate::registry::SqliteRegistry;
    use std::collections::BTreeSet;

    const MB: u64 = 1024 * 1024;

    fn windows_box() -> BoxDefinition {
        BoxDefinition {
            name: "win7-slave".to_string(),
            labels: BTreeSet::from(["windows".to_string()]),
            memory_bytes: 2048 * MB,
        }
    }

    fn idle(label: &str) -> Machine {
        let mut machine = Machine::provision(label);
        machine.state = MachineState::Unused;
        machine.snapshot_id = Some(format!("{}-baseline-1", label));
        machine
    }

    #[test]
    fn test_reservation_counts_against_slots() {
        let admission = Admission::new(1);
        let registry = SqliteRegistry::open_in_memory().unwrap();
        let oracle = FixedCapacity::new(8192 * MB);

        let (reservation, placement) = admission
            .admit(&windows_box(), "windows", &registry, &oracle)
            .unwrap();
        assert!(matches!(placement, Placement::Provision));
        assert_eq!(admission.in_flight(), (1, 2048 * MB, 0));

        let err = admission
            .admit(&windows_box(), "windows", &registry, &oracle)
            .unwrap_err();
        assert!(matches!(
            err,
            AgentManagerError::TooManyVms {
                allowed: 1,
                requested: 1
            }
        ));

        drop(reservation);
        assert_eq!(admission.in_flight(), (0, 0, 0));
    }

    #[test]
    fn test_reserved_memory_reduces_free() {
        let admission = Admission::new(5);
        let registry = SqliteRegistry::open_in_memory().unwrap();
        let oracle = FixedCapacity::new(4000 * MB);

        let _first = admission
            .admit(&windows_box(), "windows", &registry, &oracle)
            .unwrap();
        let err = admission
            .admit(&windows_box(), "windows", &registry, &oracle)
            .unwrap_err();
        match err {
            AgentManagerError::NoFreeMemory { free, required } => {
                assert_eq!(free, 1952 * MB);
                assert_eq!(required, 2048 * MB);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_equal_memory_is_refused() {
        let admission = Admission::new(1);
        let registry = SqliteRegistry::open_in_memory().unwrap();
        let oracle = FixedCapacity::new(2048 * MB);

        assert!(matches!(
            admission.admit(&windows_box(), "windows", &registry, &oracle),
            Err(AgentManagerError::NoFreeMemory { .. })
        ));
        assert_eq!(admission.in_flight(), (0, 0, 0));
    }

    #[test]
    fn test_idle_machine_is_claimed_once() {
        let admission = Admission::new(2);
        let registry = SqliteRegistry::open_in_memory().unwrap();
        let oracle = FixedCapacity::new(8192 * MB);
        let machine = idle("windows");
        registry.insert(&machine).unwrap();

        let (_first, placement) = admission
            .admit(&windows_box(), "windows", &registry, &oracle)
            .unwrap();
        match placement {
            Placement::Reuse {
                machine: reused,
                snapshot_id,
            } => {
                assert_eq!(reused.id, machine.id);
                assert_eq!(snapshot_id, "windows-baseline-1");
            }
            Placement::Provision => panic!("expected reuse"),
        }

        // The only idle machine is claimed; the next start provisions
        let (_second, placement) = admission
            .admit(&windows_box(), "windows", &registry, &oracle)
            .unwrap();
        assert!(matches!(placement, Placement::Provision));

        assert!(matches!(
            admission.claim(&machine.id),
            Err(AgentManagerError::MachineBusy(_))
        ));
    }

    #[test]
    fn test_idle_without_snapshot_not_reused() {
        let admission = Admission::new(1);
        let registry = SqliteRegistry::open_in_memory().unwrap();
        let oracle = FixedCapacity::new(8192 * MB);
        let mut machine = idle("windows");
        machine.snapshot_id = None;
        registry.insert(&machine).unwrap();

        let (_reservation, placement) = admission
            .admit(&windows_box(), "windows", &registry, &oracle)
            .unwrap();
        assert!(matches!(placement, Placement::Provision));
    }

    #[test]
    fn test_claim_released_on_drop() {
        let admission = Admission::new(1);
        let claim = admission.claim("abc").unwrap();
        assert!(admission.claim("abc").is_err());
        drop(claim);
        assert!(admission.claim("abc").is_ok());
    }

    #[test]
    fn test_oracle_failure() {
        let admission = Admission::new(1);
        let registry = SqliteRegistry::open_in_memory().unwrap();
        let oracle = FixedCapacity::new(8192 * MB);
        oracle.set_failing(true);

        assert!(matches!(
            admission.admit(&windows_box(), "windows", &registry, &oracle),
            Err(AgentManagerError::OracleUnavailable { .. })
        ));
    }
}

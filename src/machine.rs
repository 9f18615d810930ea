use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle state of a provisioned VM.
///
/// `Creating -> Running -> Unused -> Running -> ... -> Destroyed`. `Destroyed`
/// is terminal; the record is kept until it is deleted explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
    Creating,
    Running,
    Unused,
    Destroyed,
}

impl MachineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineState::Creating => "creating",
            MachineState::Running => "running",
            MachineState::Unused => "unused",
            MachineState::Destroyed => "destroyed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "creating" => Some(MachineState::Creating),
            "running" => Some(MachineState::Running),
            "unused" => Some(MachineState::Unused),
            "destroyed" => Some(MachineState::Destroyed),
            _ => None,
        }
    }

    /// Whether the machine counts against the concurrent VM ceiling
    pub fn occupies_slot(&self) -> bool {
        matches!(self, MachineState::Creating | MachineState::Running)
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry record of one provisioned VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub id: String,
    pub name: String,
    pub label: String,
    pub state: MachineState,
    /// Record revision, bumped on every write
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

impl Machine {
    /// A fresh record for a VM about to be provisioned for `label`.
    pub fn provision(label: &str) -> Self {
        let id = generate_id(label);
        let now = Utc::now();
        Self {
            name: format!("{}-{}", label, &id[..8]),
            id,
            label: label.to_string(),
            state: MachineState::Creating,
            version: 1,
            snapshot_id: None,
            created_at: now,
            modified_at: now,
        }
    }

    /// Move to `state`, bumping the revision and modification time.
    pub fn transition(&mut self, state: MachineState) {
        self.state = state;
        self.version += 1;
        self.modified_at = Utc::now();
    }

    /// Directory holding this machine's Vagrant environment
    pub fn working_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.id)
    }
}

/// Generate a machine id: md5 over the label, a nanosecond timestamp and a
/// process-local sequence number, as 32 lowercase hex characters.
pub fn generate_id(label: &str) -> String {
    let nanos = Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| Utc::now().timestamp_micros().saturating_mul(1000));
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let digest = md5::compute(format!("{}:{}:{}", label, nanos, seq).as_bytes());
    format!("{:x}", digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_state_round_trips_through_str() {
        for state in [
            MachineState::Creating,
            MachineState::Running,
            MachineState::Unused,
            MachineState::Destroyed,
        ] {
            assert_eq!(MachineState::parse(state.as_str()), Some(state));
        }
        assert_eq!(MachineState::parse("Running"), Some(MachineState::Running));
        assert_eq!(MachineState::parse("halted"), None);
    }

    #[test]
    fn test_generate_id_is_hex_md5() {
        let id = generate_id("windows");
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[test]
    fn test_generate_id_unique_in_tight_loop() {
        let ids: HashSet<String> = (0..1000).map(|_| generate_id("linux")).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_provision_embeds_label_in_name() {
        let machine = Machine::provision("linux-build");
        assert!(machine.name.starts_with("linux-build-"));
        assert_eq!(machine.name.len(), "linux-build-".len() + 8);
        assert_eq!(machine.state, MachineState::Creating);
        assert_eq!(machine.version, 1);
        assert!(machine.snapshot_id.is_none());
    }

    #[test]
    fn test_transition_bumps_version() {
        let mut machine = Machine::provision("windows");
        let before = machine.modified_at;
        machine.transition(MachineState::Running);
        assert_eq!(machine.state, MachineState::Running);
        assert_eq!(machine.version, 2);
        assert!(machine.modified_at >= before);
    }

    #[test]
    fn test_occupies_slot() {
        assert!(MachineState::Running.occupies_slot());
        assert!(MachineState::Creating.occupies_slot());
        assert!(!MachineState::Unused.occupies_slot());
        assert!(!MachineState::Destroyed.occupies_slot());
    }

    #[test]
    fn test_working_dir_uses_id() {
        let machine = Machine::provision("windows");
        let dir = machine.working_dir(Path::new("/var/lib/agents"));
        assert_eq!(dir, PathBuf::from("/var/lib/agents").join(&machine.id));
    }
}

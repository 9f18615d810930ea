use jenkins_agent_manager::machine::{Machine, MachineState};
use jenkins_agent_manager::registry::{MachineRegistry, RegistryError, SqliteRegistry};
use rusqlite::Connection;
use tempfile::TempDir;

const LATEST_SCHEMA: u32 = 3;

#[test]
fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state").join("machines.db");

    let mut machine = Machine::provision("windows");
    machine.transition(MachineState::Running);
    machine.snapshot_id = Some("windows-baseline-1400000000".to_string());

    {
        let registry = SqliteRegistry::open(&path).unwrap();
        registry.insert(&machine).unwrap();
    }

    let registry = SqliteRegistry::open(&path).unwrap();
    assert_eq!(registry.schema_version().unwrap(), LATEST_SCHEMA);
    assert_eq!(registry.get(&machine.id).unwrap(), Some(machine));
}

#[test]
fn test_upgrades_first_schema() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("machines.db");

    {
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE machines (
                id TEXT NOT NULL PRIMARY KEY,
                name TEXT NOT NULL,
                label TEXT NOT NULL,
                state TEXT NOT NULL,
                version INTEGER NOT NULL,
                createdAt TEXT NOT NULL,
                modifiedAt TEXT
            );
            INSERT INTO machines VALUES (
                '0123456789abcdef0123456789abcdef', 'windows-01234567', 'windows',
                'Running', 2, '2014-06-01T10:00:00+00:00', NULL
            );
            PRAGMA user_version = 1;",
        )
        .unwrap();
    }

    let registry = SqliteRegistry::open(&path).unwrap();
    assert_eq!(registry.schema_version().unwrap(), LATEST_SCHEMA);

    let machine = registry
        .get("0123456789abcdef0123456789abcdef")
        .unwrap()
        .unwrap();
    assert_eq!(machine.state, MachineState::Running);
    assert_eq!(machine.version, 2);
    assert!(machine.snapshot_id.is_none());
    assert_eq!(machine.modified_at, machine.created_at);

    // Upgraded rows take the new column
    let mut updated = machine.clone();
    updated.snapshot_id = Some("windows-baseline-1".to_string());
    updated.transition(MachineState::Unused);
    registry.update(&updated.id, &updated).unwrap();
    assert_eq!(
        registry.get(&updated.id).unwrap().unwrap().snapshot_id.as_deref(),
        Some("windows-baseline-1")
    );
}

#[test]
fn test_rejects_newer_schema() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("machines.db");

    {
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("PRAGMA user_version = 99;").unwrap();
    }

    match SqliteRegistry::open(&path) {
        Err(RegistryError::Migration(message)) => assert!(message.contains("99")),
        Err(other) => panic!("unexpected error: {:?}", other),
        Ok(_) => panic!("newer schema was accepted"),
    }
}

#[test]
fn test_migrations_run_once() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("machines.db");

    for _ in 0..3 {
        let registry = SqliteRegistry::open(&path).unwrap();
        assert_eq!(registry.schema_version().unwrap(), LATEST_SCHEMA);
    }
}

use super::{MachineRegistry, RegistryError};
use crate::machine::{Machine, MachineState};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Schema patches, applied in order exactly once. The index of the last
/// applied patch (plus one) is stored in `PRAGMA user_version`.
const MIGRATIONS: &[&str] = &[
    "CREATE TABLE machines (
        id TEXT NOT NULL PRIMARY KEY,
        name TEXT NOT NULL,
        label TEXT NOT NULL,
        state TEXT NOT NULL,
        version INTEGER NOT NULL,
        createdAt TEXT NOT NULL,
        modifiedAt TEXT
    );",
    "ALTER TABLE machines ADD COLUMN snapshotid TEXT;",
    "CREATE INDEX idx_machines_label_state ON machines(label, state);",
];

const SELECT_COLUMNS: &str =
    "SELECT id, name, label, state, version, createdAt, modifiedAt, snapshotid FROM machines";

/// SQLite-backed machine registry.
pub struct SqliteRegistry {
    conn: Mutex<Connection>,
}

impl SqliteRegistry {
    /// Open (creating if needed) the registry at `path` and bring its schema
    /// up to date.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        info!(path = %path.display(), "Opened machine registry");
        Self::with_connection(conn)
    }

    /// Open an in-memory registry (for testing).
    pub fn open_in_memory() -> Result<Self, RegistryError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(mut conn: Connection) -> Result<Self, RegistryError> {
        migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Current schema version of the underlying database
    pub fn schema_version(&self) -> Result<u32, RegistryError> {
        Ok(schema_version(&self.lock())?)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-call can't leave SQLite half-written, so a poisoned
        // lock is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

fn migrate(conn: &mut Connection) -> Result<(), RegistryError> {
    let current = schema_version(conn)?;
    let latest = MIGRATIONS.len() as u32;

    if current > latest {
        return Err(RegistryError::Migration(format!(
            "database schema version {} is newer than supported version {}",
            current, latest
        )));
    }
    if current == latest {
        return Ok(());
    }

    info!(from = current, to = latest, "Updating registry schema");

    let tx = conn.transaction()?;
    for (index, patch) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        debug!(patch = index + 1, "Applying schema patch");
        tx.execute_batch(patch)
            .map_err(|e| RegistryError::Migration(format!("patch {}: {}", index + 1, e)))?;
    }
    tx.pragma_update(None, "user_version", latest)?;
    tx.commit()?;

    Ok(())
}

/// Raw column values, converted to a `Machine` outside the rusqlite closure
/// so decoding problems surface as `Corrupt` rather than SQL errors.
struct MachineRow {
    id: String,
    name: String,
    label: String,
    state: String,
    version: u32,
    created_at: String,
    modified_at: Option<String>,
    snapshot_id: Option<String>,
}

impl MachineRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            label: row.get(2)?,
            state: row.get(3)?,
            version: row.get(4)?,
            created_at: row.get(5)?,
            modified_at: row.get(6)?,
            snapshot_id: row.get(7)?,
        })
    }

    fn into_machine(self) -> Result<Machine, RegistryError> {
        let state = MachineState::parse(&self.state).ok_or_else(|| {
            RegistryError::Corrupt(format!("machine {} has unknown state '{}'", self.id, self.state))
        })?;
        let created_at = parse_timestamp(&self.id, &self.created_at)?;
        let modified_at = match self.modified_at.as_deref() {
            Some(ts) if !ts.is_empty() => parse_timestamp(&self.id, ts)?,
            _ => created_at,
        };

        Ok(Machine {
            id: self.id,
            name: self.name,
            label: self.label,
            state,
            version: self.version,
            snapshot_id: self.snapshot_id.filter(|s| !s.is_empty()),
            created_at,
            modified_at,
        })
    }
}

fn parse_timestamp(id: &str, value: &str) -> Result<DateTime<Utc>, RegistryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| RegistryError::Corrupt(format!("machine {} has bad timestamp '{}'", id, value)))
}

impl MachineRegistry for SqliteRegistry {
    fn list(&self) -> Result<Vec<Machine>, RegistryError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!("{} ORDER BY createdAt", SELECT_COLUMNS))?;
        let rows = stmt
            .query_map([], MachineRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(MachineRow::into_machine).collect()
    }

    fn get(&self, id: &str) -> Result<Option<Machine>, RegistryError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                MachineRow::from_row,
            )
            .optional()?;

        row.map(MachineRow::into_machine).transpose()
    }

    fn insert(&self, machine: &Machine) -> Result<(), RegistryError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO machines (id, name, label, state, version, createdAt, modifiedAt, snapshotid)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                machine.id,
                machine.name,
                machine.label,
                machine.state.as_str(),
                machine.version,
                machine.created_at.to_rfc3339(),
                machine.modified_at.to_rfc3339(),
                machine.snapshot_id,
            ],
        )?;
        tx.commit()?;

        debug!(id = %machine.id, state = %machine.state, "Inserted machine");
        Ok(())
    }

    fn update(&self, id: &str, machine: &Machine) -> Result<(), RegistryError> {
        let expected = machine.version.saturating_sub(1);

        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE machines
             SET id = ?1, name = ?2, label = ?3, state = ?4, version = ?5,
                 createdAt = ?6, modifiedAt = ?7, snapshotid = ?8
             WHERE id = ?9 AND version = ?10",
            params![
                machine.id,
                machine.name,
                machine.label,
                machine.state.as_str(),
                machine.version,
                machine.created_at.to_rfc3339(),
                machine.modified_at.to_rfc3339(),
                machine.snapshot_id,
                id,
                expected,
            ],
        )?;

        if changed == 0 {
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM machines WHERE id = ?1)",
                params![id],
                |row| row.get(0),
            )?;
            return Err(if exists {
                RegistryError::Conflict {
                    id: id.to_string(),
                    expected,
                }
            } else {
                RegistryError::NotFound(id.to_string())
            });
        }
        tx.commit()?;

        debug!(id, state = %machine.state, version = machine.version, "Updated machine");
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), RegistryError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let changed = tx.execute("DELETE FROM machines WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        tx.commit()?;

        debug!(id, "Deleted machine");
        Ok(())
    }
}

//! Database schema for the machine store

use rusqlite::{params, Connection};
use tracing::{debug, info};

use super::StoreResult;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// First MAC block handed out; interfaces take the addresses after it
pub const MAC_BASE: u64 = 0xde_ad_be_ef_00_00;

fn init_schema_version(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> StoreResult<i32> {
    init_schema_version(conn)?;

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Bring the database up to [`SCHEMA_VERSION`]
pub fn migrate(conn: &Connection) -> StoreResult<()> {
    let current = get_schema_version(conn)?;
    debug!("Current schema version: {}", current);

    if current >= SCHEMA_VERSION {
        return Ok(());
    }

    if current < 1 {
        info!("Creating machine store schema v1");
        migrate_v1(conn)?;
        conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [1])?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE vms (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            arch TEXT NOT NULL,
            smp TEXT NOT NULL,
            mem TEXT NOT NULL,
            vnc INTEGER NOT NULL,
            source TEXT,
            imported INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE ifaces (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            vm_name TEXT NOT NULL REFERENCES vms(name) ON DELETE CASCADE,
            if_name TEXT NOT NULL UNIQUE,
            mac_addr TEXT NOT NULL,
            if_drv TEXT NOT NULL
        );

        CREATE TABLE drives (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            vm_name TEXT NOT NULL REFERENCES vms(name) ON DELETE CASCADE,
            drive_name TEXT NOT NULL,
            drive_drv TEXT NOT NULL,
            capacity TEXT NOT NULL,
            boot INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX idx_ifaces_vm ON ifaces(vm_name);
        CREATE INDEX idx_drives_vm ON drives(vm_name);

        CREATE TABLE lastval (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            mac INTEGER NOT NULL,
            vnc INTEGER NOT NULL
        );
        ",
    )?;

    conn.execute(
        "INSERT INTO lastval (id, mac, vnc) VALUES (1, ?1, -1)",
        params![MAC_BASE as i64],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM lastval", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_lastval_seed() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        let (mac, vnc): (i64, i64) = conn
            .query_row("SELECT mac, vnc FROM lastval WHERE id = 1", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(mac as u64, MAC_BASE);
        assert_eq!(vnc, -1);
    }
}

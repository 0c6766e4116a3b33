//! SQLite machine store
//!
//! Holds machines, their interfaces and drives, and the MAC/VNC allocation
//! state. The import pipeline only needs three things from it: a name
//! lookup, one transactional insert, and an [`IdentityAllocator`].

pub mod identity;
pub mod schema;

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::vm::MachineRecord;

pub use identity::{IdentityAllocator, LastValAllocator};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("cannot create database directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Summary row for listing machines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineSummary {
    pub name: String,
    pub arch: String,
    pub cpus: String,
    pub memory: String,
    pub vnc_port: u32,
    pub imported: bool,
    pub drives: u32,
    pub interfaces: u32,
}

impl MachineSummary {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            arch: row.get(1)?,
            cpus: row.get(2)?,
            memory: row.get(3)?,
            vnc_port: row.get(4)?,
            imported: row.get(5)?,
            drives: row.get(6)?,
            interfaces: row.get(7)?,
        })
    }
}

const SUMMARY_SELECT: &str = "
    SELECT v.name, v.arch, v.smp, v.mem, v.vnc, v.imported,
           (SELECT COUNT(*) FROM drives d WHERE d.vm_name = v.name),
           (SELECT COUNT(*) FROM ifaces i WHERE i.vm_name = v.name)
    FROM vms v";

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating if needed) the store at `path`
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Directory {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        debug!("opening store {}", path.display());
        Self::init(Connection::open(path)?)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    /// Allocator backed by this store's `lastval` row
    pub fn allocator(&self) -> LastValAllocator<'_> {
        LastValAllocator::new(&self.conn)
    }

    pub fn name_in_use(&self, name: &str) -> StoreResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT id FROM vms WHERE name = ?1", [name], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// First of `names` already taken by a stored interface
    pub fn interface_in_use(&self, names: &[String]) -> StoreResult<Option<String>> {
        let mut stmt = self.conn.prepare("SELECT 1 FROM ifaces WHERE if_name = ?1")?;
        for name in names {
            if stmt.exists([name])? {
                return Ok(Some(name.clone()));
            }
        }
        Ok(None)
    }

    /// Insert a machine with its interfaces and drives, and advance the
    /// allocation state past the values it uses, in one transaction
    pub fn insert_machine(&self, record: &MachineRecord) -> StoreResult<i64> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO vms (name, arch, smp, mem, vnc, source, imported, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)",
            params![
                &record.name,
                &record.arch,
                &record.cpus,
                &record.memory,
                record.vnc_port,
                record.source.to_string_lossy().into_owned(),
                chrono::Local::now().to_rfc3339(),
            ],
        )?;
        let id = tx.last_insert_rowid();

        for iface in &record.interfaces {
            tx.execute(
                "INSERT INTO ifaces (vm_name, if_name, mac_addr, if_drv) VALUES (?1, ?2, ?3, ?4)",
                params![&record.name, &iface.name, &iface.mac, &iface.driver],
            )?;
        }

        for drive in &record.drives {
            tx.execute(
                "INSERT INTO drives (vm_name, drive_name, drive_drv, capacity, boot)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    &record.name,
                    &drive.file_name,
                    &drive.driver,
                    &drive.capacity,
                    drive.boot
                ],
            )?;
        }

        let last_mac = record.mac_block + record.interfaces.len() as u64;
        tx.execute(
            "UPDATE lastval SET mac = MAX(mac, ?1), vnc = MAX(vnc, ?2) WHERE id = 1",
            params![last_mac as i64, record.vnc_port],
        )?;

        tx.commit()?;
        debug!("stored machine {} (id {})", record.name, id);
        Ok(id)
    }

    pub fn list_machines(&self) -> StoreResult<Vec<MachineSummary>> {
        let mut stmt = self.conn.prepare(&format!("{} ORDER BY v.name", SUMMARY_SELECT))?;
        let rows = stmt
            .query_map([], MachineSummary::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    #[cfg(test)]
    pub fn find_machine(&self, name: &str) -> StoreResult<Option<MachineSummary>> {
        let mut stmt = self.conn.prepare(&format!("{} WHERE v.name = ?1", SUMMARY_SELECT))?;
        let row = stmt.query_row([name], MachineSummary::from_row).optional()?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::machine::{generate_interfaces, DriveRecord, InterfaceRecord};

    fn record(name: &str, mac_block: u64, vnc_port: u32, ifaces: u32) -> MachineRecord {
        MachineRecord {
            name: name.to_string(),
            arch: "x86_64".to_string(),
            cpus: "2".to_string(),
            memory: "2048".to_string(),
            source: PathBuf::from("/srv/appliance.ova"),
            vnc_port,
            mac_block,
            interfaces: generate_interfaces(name, ifaces, mac_block, "virtio-net-pci"),
            drives: vec![DriveRecord {
                file_name: "disk1.vmdk".to_string(),
                capacity: "10737418240".to_string(),
                driver: "virtio".to_string(),
                boot: true,
            }],
        }
    }

    #[test]
    fn test_insert_and_find() {
        let store = Store::open_in_memory().unwrap();
        assert!(!store.name_in_use("web").unwrap());

        store.insert_machine(&record("web", schema::MAC_BASE, 0, 2)).unwrap();

        assert!(store.name_in_use("web").unwrap());
        let summary = store.find_machine("web").unwrap().unwrap();
        assert_eq!(summary.cpus, "2");
        assert_eq!(summary.memory, "2048");
        assert_eq!(summary.drives, 1);
        assert_eq!(summary.interfaces, 2);
        assert!(summary.imported);
    }

    #[test]
    fn test_interface_in_use() {
        let store = Store::open_in_memory().unwrap();
        store.insert_machine(&record("web", schema::MAC_BASE, 0, 2)).unwrap();

        let free = vec!["db_eth0".to_string()];
        assert_eq!(store.interface_in_use(&free).unwrap(), None);
        let taken = vec!["db_eth0".to_string(), "web_eth1".to_string()];
        assert_eq!(
            store.interface_in_use(&taken).unwrap(),
            Some("web_eth1".to_string())
        );
    }

    #[test]
    fn test_insert_advances_allocation() {
        let store = Store::open_in_memory().unwrap();
        let mut alloc = store.allocator();
        assert_eq!(alloc.next_mac_block().unwrap(), schema::MAC_BASE);
        assert_eq!(alloc.next_vnc_port().unwrap(), 0);

        store.insert_machine(&record("web", schema::MAC_BASE, 0, 2)).unwrap();

        let mut alloc = store.allocator();
        assert_eq!(alloc.next_mac_block().unwrap(), schema::MAC_BASE + 2);
        assert_eq!(alloc.next_vnc_port().unwrap(), 1);
    }

    #[test]
    fn test_duplicate_name_rolls_back() {
        let store = Store::open_in_memory().unwrap();
        store.insert_machine(&record("web", schema::MAC_BASE, 0, 1)).unwrap();

        let mut dup = record("web", schema::MAC_BASE + 1, 1, 1);
        dup.interfaces = vec![InterfaceRecord {
            name: "other_eth0".to_string(),
            mac: "de:ad:be:ef:00:02".to_string(),
            driver: "virtio-net-pci".to_string(),
        }];
        assert!(store.insert_machine(&dup).is_err());

        // Nothing from the failed transaction is visible
        let ifaces: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM ifaces", [], |row| row.get(0))
            .unwrap();
        assert_eq!(ifaces, 1);
        assert_eq!(store.allocator().next_vnc_port().unwrap(), 1);
    }

    #[test]
    fn test_list_machines_sorted() {
        let store = Store::open_in_memory().unwrap();
        store.insert_machine(&record("zeta", schema::MAC_BASE, 0, 0)).unwrap();
        store.insert_machine(&record("alpha", schema::MAC_BASE, 1, 1)).unwrap();

        let names: Vec<String> = store
            .list_machines()
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("vmkeep.db");
        let store = Store::open(&path).unwrap();
        assert!(path.exists());
        assert!(store.list_machines().unwrap().is_empty());
    }
}

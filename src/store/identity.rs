//! MAC block and VNC port allocation

use rusqlite::Connection;

use super::StoreResult;

/// Source of per-machine identity values
///
/// `next_mac_block` returns the last MAC handed out; a machine with N
/// interfaces uses the N addresses after it. `next_vnc_port` returns the
/// display number for the new machine. Values are committed together with
/// the machine, see [`super::Store::insert_machine`].
pub trait IdentityAllocator {
    fn next_mac_block(&mut self) -> StoreResult<u64>;
    fn next_vnc_port(&mut self) -> StoreResult<u32>;
}

/// Reads the allocation state kept in the store's `lastval` row
pub struct LastValAllocator<'c> {
    conn: &'c Connection,
}

impl<'c> LastValAllocator<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

impl IdentityAllocator for LastValAllocator<'_> {
    fn next_mac_block(&mut self) -> StoreResult<u64> {
        let mac: i64 = self
            .conn
            .query_row("SELECT mac FROM lastval WHERE id = 1", [], |row| row.get(0))?;
        Ok(mac as u64)
    }

    fn next_vnc_port(&mut self) -> StoreResult<u32> {
        let vnc: i64 = self
            .conn
            .query_row("SELECT vnc FROM lastval WHERE id = 1", [], |row| row.get(0))?;
        Ok((vnc + 1).max(0) as u32)
    }
}

/// Hands out fixed values, for tests that must not depend on store state
#[cfg(test)]
pub(crate) struct FixedAllocator {
    pub mac: u64,
    pub vnc: u32,
}

#[cfg(test)]
impl IdentityAllocator for FixedAllocator {
    fn next_mac_block(&mut self) -> StoreResult<u64> {
        Ok(self.mac)
    }

    fn next_vnc_port(&mut self) -> StoreResult<u32> {
        Ok(self.vnc)
    }
}

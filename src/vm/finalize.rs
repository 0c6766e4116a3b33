//! Turn a completed draft into a stored machine

use tracing::{debug, warn};

use super::error::{ImportError, ImportResult};
use super::machine::{generate_interfaces, DriveRecord, MachineDraft, MachineRecord};
use crate::hardware;
use crate::store::{IdentityAllocator, Store};

/// Allocate identity values for `draft`, build its record and commit it
///
/// `draft.net_driver` and `draft.vnc_port` are filled in along the way.
pub fn finalize(
    draft: &mut MachineDraft,
    drive_driver: &str,
    net_driver: &str,
    allocator: &mut dyn IdentityAllocator,
    store: &Store,
) -> ImportResult<MachineRecord> {
    let name = draft
        .name
        .clone()
        .ok_or(ImportError::EmptyFields(vec!["Name"]))?;

    draft.net_driver = net_driver.to_string();
    let mac_block = allocator.next_mac_block()?;
    let vnc_port = allocator.next_vnc_port()?;
    draft.vnc_port = vnc_port.to_string();
    debug!("ova: vnc port: {}, mac block: {:#x}", draft.vnc_port, mac_block);

    warn_if_memory_exceeds_host(&draft.memory);

    let record = MachineRecord {
        interfaces: generate_interfaces(&name, draft.interface_count, mac_block, &draft.net_driver),
        drives: draft
            .disks
            .iter()
            .enumerate()
            .map(|(i, disk)| DriveRecord {
                file_name: disk.file_name.clone(),
                capacity: disk.capacity.clone(),
                driver: drive_driver.to_string(),
                boot: i == 0,
            })
            .collect(),
        name,
        arch: draft.arch.clone(),
        cpus: draft.cpus.clone(),
        memory: draft.memory.clone(),
        source: draft.source.clone(),
        vnc_port,
        mac_block,
    };

    store.insert_machine(&record)?;
    Ok(record)
}

fn warn_if_memory_exceeds_host(memory: &str) {
    let Ok(requested) = memory.trim().parse::<u64>() else {
        return;
    };
    if let Some(total) = hardware::total_ram_mib() {
        if requested > total {
            warn!(
                "Machine memory ({} MiB) exceeds host RAM ({} MiB)",
                requested, total
            );
        }
    }
}

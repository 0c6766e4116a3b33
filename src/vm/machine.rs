//! Machine records built by the import pipeline

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;

/// Maximum machine name length accepted from the user
pub const MAX_NAME_LEN: usize = 30;

/// Linux IFNAMSIZ minus the terminating NUL
const MAX_IFNAME_LEN: usize = 15;

/// Valid machine names: what the import form accepts
static RE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]{1,30}$").expect("Invalid regex: RE_NAME"));

/// One disk recovered from the descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskSpec {
    /// File name inside the appliance (and of the converted image)
    pub file_name: String,
    /// Capacity exactly as written in the descriptor
    pub capacity: String,
}

/// The machine being imported, filled in stage by stage
#[derive(Debug, Clone, Default)]
pub struct MachineDraft {
    pub name: Option<String>,
    pub source: PathBuf,
    pub arch: String,
    pub cpus: String,
    pub memory: String,
    pub disks: Vec<DiskSpec>,
    pub interface_count: u32,
    pub net_driver: String,
    pub vnc_port: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceRecord {
    pub name: String,
    pub mac: String,
    pub driver: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveRecord {
    pub file_name: String,
    pub capacity: String,
    pub driver: String,
    pub boot: bool,
}

/// Everything committed to the store for one machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineRecord {
    pub name: String,
    pub arch: String,
    pub cpus: String,
    pub memory: String,
    pub source: PathBuf,
    pub vnc_port: u32,
    pub mac_block: u64,
    pub interfaces: Vec<InterfaceRecord>,
    pub drives: Vec<DriveRecord>,
}

/// Check a user-supplied machine name
pub fn is_valid_name(name: &str) -> bool {
    RE_NAME.is_match(name)
}

/// Turn a descriptor-provided name into a valid machine name
///
/// Characters outside `[A-Za-z0-9_-]` become `_` and the result is cut to
/// [`MAX_NAME_LEN`]. Returns `None` if nothing usable is left.
pub fn normalize_name(raw: &str) -> Option<String> {
    let name: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_LEN)
        .collect();

    if name.is_empty() || name.chars().all(|c| c == '_') {
        None
    } else {
        Some(name)
    }
}

/// Render the low 48 bits of `mac` as `aa:bb:cc:dd:ee:ff`
pub fn format_mac(mac: u64) -> String {
    (0..6)
        .rev()
        .map(|byte| format!("{:02x}", (mac >> (byte * 8)) & 0xff))
        .collect::<Vec<_>>()
        .join(":")
}

/// Interface name for the `index`-th adapter of `vm_name`
///
/// Names that fit the kernel's limit are used as is. Longer machine names are
/// cut and tagged with a hash of the full name, so two machines sharing a
/// long prefix still get different interfaces.
pub fn interface_name(vm_name: &str, index: u32) -> String {
    let suffix = format!("_eth{}", index);
    let room = MAX_IFNAME_LEN.saturating_sub(suffix.len());
    if vm_name.len() <= room {
        return format!("{}{}", vm_name, suffix);
    }

    let tag = format!("{:04x}", name_hash(vm_name) & 0xffff);
    let prefix: String = vm_name.chars().take(room.saturating_sub(tag.len())).collect();
    format!("{}{}{}", prefix, tag, suffix)
}

/// 32-bit FNV-1a, stable across builds
fn name_hash(name: &str) -> u32 {
    name.bytes().fold(0x811c_9dc5, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
    })
}

/// Build the interface list for `count` adapters, taking MACs after `block`
pub fn generate_interfaces(
    vm_name: &str,
    count: u32,
    block: u64,
    driver: &str,
) -> Vec<InterfaceRecord> {
    (0..count)
        .map(|i| InterfaceRecord {
            name: interface_name(vm_name, i),
            mac: format_mac(block + u64::from(i) + 1),
            driver: driver.to_string(),
        })
        .collect()
}

//! Disk conversion into the machine directory

use std::path::{Component, Path};
use tracing::{debug, info, warn};

use super::error::{ImportError, ImportResult};
use super::machine::DiskSpec;
use crate::commands::{qemu_img, CommandRunner};
use crate::fs;

/// A disk file name must be a single plain path component
fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains('/')
}

/// Create `machine_dir` and convert every disk from `work_dir` into it
///
/// Converted images keep their file names. If anything fails after the
/// directory was created, the directory is removed again.
pub fn convert_disks(
    runner: &dyn CommandRunner,
    qemu_img: &Path,
    disks: &[DiskSpec],
    machine_dir: &Path,
    work_dir: &Path,
) -> ImportResult<()> {
    fs::create_machine_dir(runner, machine_dir).map_err(|e| ImportError::MachineDir {
        path: machine_dir.to_path_buf(),
        reason: format!("{:#}", e),
    })?;

    let result = disks
        .iter()
        .try_for_each(|disk| convert_one(runner, qemu_img, disk, machine_dir, work_dir));

    if result.is_err() {
        debug!("ova: removing {}", machine_dir.display());
        if let Err(e) = std::fs::remove_dir_all(machine_dir) {
            warn!("Could not remove {}: {}", machine_dir.display(), e);
        }
    }

    result
}

fn convert_one(
    runner: &dyn CommandRunner,
    qemu_img: &Path,
    disk: &DiskSpec,
    machine_dir: &Path,
    work_dir: &Path,
) -> ImportResult<()> {
    if !is_plain_file_name(&disk.file_name) {
        return Err(ImportError::UnsafeDiskName(disk.file_name.clone()));
    }

    let source = work_dir.join(&disk.file_name);
    if !source.is_file() {
        return Err(ImportError::MissingDiskImage(disk.file_name.clone()));
    }
    let dest = machine_dir.join(&disk.file_name);

    let format = qemu_img::detect_disk_format(runner, qemu_img, &source);
    if let Some(format) = &format {
        debug!("ova: {} format: {}", disk.file_name, format);
    }

    info!("Converting {} to qcow2", disk.file_name);
    qemu_img::convert_to_qcow2(runner, qemu_img, &source, format.as_deref(), &dest).map_err(|e| {
        ImportError::Conversion {
            disk: disk.file_name.clone(),
            reason: format!("{:#}", e),
        }
    })
}

//! QEMU disk image operations
//!
//! Wrappers around qemu-img for appliance disk conversion and format detection.

use anyhow::{bail, Context, Result};
use std::ffi::OsString;
use std::path::Path;

use super::CommandRunner;

/// Convert any qemu-img readable image (vmdk, vhd, raw...) to qcow2
///
/// A known `source_format` is passed with `-f` so qemu-img does not have to
/// guess it again.
pub fn convert_to_qcow2(
    runner: &dyn CommandRunner,
    qemu_img: &Path,
    source: &Path,
    source_format: Option<&str>,
    dest: &Path,
) -> Result<()> {
    let mut args: Vec<OsString> = vec!["convert".into()];
    if let Some(format) = source_format {
        args.push("-f".into());
        args.push(format.into());
    }
    args.extend([OsString::from("-O"), "qcow2".into(), source.into(), dest.into()]);
    let output = runner
        .output(qemu_img.as_os_str(), &args)
        .with_context(|| format!("Failed to run {} convert", qemu_img.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "qemu-img convert exited with {}: {}",
            output.status,
            stderr.trim()
        );
    }

    Ok(())
}

/// Detect the format of a disk image (returns format string like "vmdk", "raw", etc.)
pub fn detect_disk_format(runner: &dyn CommandRunner, qemu_img: &Path, path: &Path) -> Option<String> {
    let args: Vec<OsString> = vec!["info".into(), "--output=json".into(), path.into()];
    let output = runner.output(qemu_img.as_os_str(), &args).ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value = serde_json::from_str(&stdout).ok()?;

    json["format"].as_str().map(|s| s.to_string())
}

//! Filesystem utilities
//!
//! Machine directory creation, including BTRFS copy-on-write handling for
//! the qcow2 images written into it.

use anyhow::{bail, Context, Result};
use std::ffi::{OsStr, OsString};
use std::path::Path;
use tracing::{debug, warn};

use crate::commands::CommandRunner;

/// BTRFS filesystem magic number as printed by `stat -f -c %t`
const BTRFS_SUPER_MAGIC: &str = "9123683e";

/// Check if a path is on a BTRFS filesystem
pub fn is_btrfs(runner: &dyn CommandRunner, path: &Path) -> bool {
    let args: Vec<OsString> = vec!["-f".into(), "-c".into(), "%t".into(), path.into()];
    match runner.output(OsStr::new("stat"), &args) {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).trim().to_lowercase() == BTRFS_SUPER_MAGIC
        }
        _ => false,
    }
}

/// Disable copy-on-write on a directory using chattr +C
///
/// Only affects files created afterwards, so run it on an empty directory.
pub fn disable_cow(runner: &dyn CommandRunner, path: &Path) -> Result<()> {
    let args: Vec<OsString> = vec!["+C".into(), path.into()];
    let output = runner
        .output(OsStr::new("chattr"), &args)
        .context("Failed to run chattr command")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.contains("Operation not supported") && !stderr.contains("Inappropriate ioctl") {
            bail!("chattr +C failed: {}", stderr.trim());
        }
    }

    Ok(())
}

/// Create a new machine directory
///
/// The parent library directory is created as needed; the machine directory
/// itself must not exist yet. On BTRFS, copy-on-write is turned off before
/// any image lands in it (double CoW with qcow2 degrades performance).
///
/// Returns Ok(true) if CoW was disabled.
pub fn create_machine_dir(runner: &dyn CommandRunner, path: &Path) -> Result<bool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    if path.exists() {
        bail!("VM directory already exists: {}", path.display());
    }

    std::fs::create_dir(path)
        .with_context(|| format!("Failed to create VM directory {}", path.display()))?;

    if is_btrfs(runner, path) {
        match disable_cow(runner, path) {
            Ok(()) => {
                debug!("disabled copy-on-write on {}", path.display());
                return Ok(true);
            }
            Err(e) => warn!("Could not disable copy-on-write: {:#}", e),
        }
    }

    Ok(false)
}

//! Appliance archive extraction

use std::fs::File;
use std::path::Path;
use tracing::debug;

use super::error::{ImportError, ImportResult};

/// Unpack every entry of the tar archive at `archive` into `dest`
///
/// Entry names are appended to `files` in archive order, each one before its
/// data is written, so a failure half-way through still leaves every
/// touched path listed for cleanup. Entries that would land outside `dest`
/// make the archive unusable.
pub fn extract(archive: &Path, dest: &Path, files: &mut Vec<String>) -> ImportResult<()> {
    let bad_archive = |reason: String| ImportError::BadArchive {
        path: archive.to_path_buf(),
        reason,
    };

    let file = File::open(archive).map_err(|source| ImportError::ArchiveOpen {
        path: archive.to_path_buf(),
        source,
    })?;

    let mut tar = tar::Archive::new(file);
    tar.set_preserve_permissions(false);
    tar.set_preserve_mtime(false);
    tar.set_unpack_xattrs(false);

    let entries = tar.entries().map_err(|e| bad_archive(e.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| bad_archive(e.to_string()))?;
        let name = entry
            .path()
            .map_err(|e| bad_archive(e.to_string()))?
            .to_string_lossy()
            .into_owned();

        files.push(name.clone());
        debug!("ova: extract file: {}", name);

        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| bad_archive(format!("{}: {}", name, e)))?;
        if !unpacked {
            return Err(bad_archive(format!("entry '{}' escapes the extraction directory", name)));
        }
    }

    Ok(())
}

//! Temporary extraction directory and its cleanup

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

use super::error::{ImportError, ImportResult};

const WORK_DIR_PREFIX: &str = "ova_extract_";

/// Create a fresh, uniquely named extraction directory under `tmp_dir`
///
/// The directory is not removed automatically; [`clean_temp_dir`] owns that.
pub fn create_temp_dir(tmp_dir: &Path) -> ImportResult<PathBuf> {
    let work_err = |source| ImportError::WorkDir {
        path: tmp_dir.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(tmp_dir).map_err(work_err)?;
    let dir = tempfile::Builder::new()
        .prefix(WORK_DIR_PREFIX)
        .tempdir_in(tmp_dir)
        .map_err(work_err)?
        .keep();

    debug!("ova: tmp dir: {}", dir.display());
    Ok(dir)
}

/// Where an archive entry named `name` lives under `dir`
///
/// Root and `.` components are dropped, matching how entries are unpacked.
/// Names climbing out with `..` have no location.
pub fn entry_path(dir: &Path, name: &str) -> Option<PathBuf> {
    let mut path = dir.to_path_buf();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::ParentDir => return None,
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    Some(path)
}

/// Paths that could not be removed during cleanup
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub failed: Vec<(PathBuf, std::io::Error)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Remove every extracted entry and then `dir` itself
///
/// Entries go in reverse extraction order so directories are empty by the
/// time they are reached. Parent directories the archive never listed, but
/// which unpacking created, go next, deepest first. Already-missing paths
/// count as removed.
pub fn clean_temp_dir(dir: &Path, files: &[String]) -> CleanupReport {
    let mut report = CleanupReport::default();
    let mut parents = BTreeSet::new();

    for name in files.iter().rev() {
        let Some(path) = entry_path(dir, name) else {
            continue;
        };
        if path == dir {
            continue;
        }
        parents.extend(
            path.ancestors()
                .skip(1)
                .take_while(|p| *p != dir)
                .map(Path::to_path_buf),
        );
        let result = match std::fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => std::fs::remove_dir(&path),
            Ok(_) => std::fs::remove_file(&path),
            Err(e) => Err(e),
        };
        record(&mut report, path, result);
    }

    let mut parents: Vec<PathBuf> = parents.into_iter().collect();
    parents.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
    for path in parents {
        let result = std::fs::remove_dir(&path);
        record(&mut report, path, result);
    }

    let result = std::fs::remove_dir(dir);
    record(&mut report, dir.to_path_buf(), result);

    if !report.is_clean() {
        warn!("Some files were not deleted:");
        for (path, err) in &report.failed {
            warn!("  {}: {}", path.display(), err);
        }
    }

    report
}

fn record(report: &mut CleanupReport, path: PathBuf, result: std::io::Result<()>) {
    match result {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => report.failed.push((path, e)),
    }
}

//! Host memory detection

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

const MEMINFO_PATH: &str = "/proc/meminfo";

/// Total host RAM in MiB, or None if it cannot be determined
pub fn total_ram_mib() -> Option<u64> {
    read_meminfo_total(Path::new(MEMINFO_PATH)).ok()
}

/// Read the MemTotal line of a meminfo file, converted from KiB to MiB
pub fn read_meminfo_total(path: &Path) -> Result<u64> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_mem_total(&content).context("MemTotal not found in meminfo")
}

fn parse_mem_total(content: &str) -> Option<u64> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kib| kib.parse::<u64>().ok())
        .map(|kib| kib / 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mem_total() {
        let content = "MemTotal:       16318508 kB\nMemFree:         1234567 kB\n";
        assert_eq!(parse_mem_total(content), Some(15936));
        assert_eq!(parse_mem_total("MemFree: 1 kB\n"), None);
    }

    #[test]
    fn test_read_meminfo_total_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("meminfo");
        std::fs::write(&path, "MemTotal: 2097152 kB\n").unwrap();
        assert_eq!(read_meminfo_total(&path).unwrap(), 2048);
        assert!(read_meminfo_total(&tmp.path().join("missing")).is_err());
    }
}

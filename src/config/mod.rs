use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const APP_DIR: &str = "vmkeep";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding one subdirectory per machine
    pub vm_dir: PathBuf,
    /// SQLite machine store
    pub db_path: PathBuf,
    /// Where appliance archives are unpacked during import
    pub tmp_dir: PathBuf,
    /// Architectures a machine can be created for
    pub qemu_targets: Vec<String>,
    /// qemu-img binary, looked up in PATH if not absolute
    pub qemu_img: PathBuf,
    /// Network device model for imported interfaces
    pub default_net_driver: String,
    /// Drive interface for imported disks
    pub default_drive_driver: String,
    /// Show a spinner while importing
    pub spinner: bool,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| home.join(".local").join("share"))
            .join(APP_DIR);

        Self {
            vm_dir: home.join(APP_DIR),
            db_path: data_dir.join("vmkeep.db"),
            tmp_dir: std::env::temp_dir(),
            qemu_targets: vec![
                "x86_64".to_string(),
                "i386".to_string(),
                "aarch64".to_string(),
            ],
            qemu_img: PathBuf::from("qemu-img"),
            default_net_driver: "virtio-net-pci".to_string(),
            default_drive_driver: "virtio".to_string(),
            spinner: true,
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config from {:?}", config_path))?;
            Self::from_toml(&content)
                .with_context(|| format!("Failed to parse config from {:?}", config_path))
        } else {
            Ok(Self::default())
        }
    }

    fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_file_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config to {:?}", config_path))?;

        Ok(())
    }

    /// Get the configuration file path
    pub fn config_file_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.vm_dir)
            .with_context(|| format!("Failed to create VM directory {:?}", self.vm_dir))?;
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory {:?}", parent))?;
        }
        Ok(())
    }

    /// Default architecture for imports: the first configured target
    pub fn default_arch(&self) -> Option<&str> {
        self.qemu_targets.first().map(String::as_str)
    }

    pub fn supports_arch(&self, arch: &str) -> bool {
        self.qemu_targets.iter().any(|t| t == arch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml("vm_dir = \"/srv/vms\"\nspinner = false\n").unwrap();
        assert_eq!(config.vm_dir, PathBuf::from("/srv/vms"));
        assert!(!config.spinner);
        assert_eq!(config.default_net_driver, "virtio-net-pci");
        assert_eq!(config.default_arch(), Some("x86_64"));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = Config::default();
        config.qemu_targets = vec!["riscv64".to_string()];
        let text = toml::to_string_pretty(&config).unwrap();
        let back = Config::from_toml(&text).unwrap();
        assert!(back.supports_arch("riscv64"));
        assert!(!back.supports_arch("x86_64"));
    }

    #[test]
    fn test_bad_value_is_an_error() {
        assert!(Config::from_toml("spinner = \"yes\"").is_err());
    }
}

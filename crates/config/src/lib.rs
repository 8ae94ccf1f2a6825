use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which image the boot loader chain should prefer when several are present
/// in storage.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BootOrder {
    #[default]
    Default,
    Boot2,
    Diags,
}

/// Optional images layered over the storage contents before boot. These are
/// consumed by the storage collaborator; the core only carries the paths.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default, deny_unknown_fields)]
pub struct OverrideImages {
    pub manuf: Option<PathBuf>,
    pub boot2: Option<PathBuf>,
    pub diags: Option<PathBuf>,
    pub os: Option<PathBuf>,
    pub boot_data: Option<PathBuf>,
}

impl OverrideImages {
    pub fn is_empty(&self) -> bool {
        self.manuf.is_none()
            && self.boot2.is_none()
            && self.diags.is_none()
            && self.os.is_none()
            && self.boot_data.is_none()
    }
}

/// Process-wide emulator session configuration. Set once before `start`,
/// read throughout the run.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default, deny_unknown_fields)]
pub struct EmuConfig {
    /// Storage (flash) image backing the emulated machine. Required for a
    /// cold boot; a resume restores storage contents from the snapshot.
    pub storage_image: Option<PathBuf>,
    /// Boot ROM image, loaded verbatim into the first 512 KiB.
    pub boot_rom: Option<PathBuf>,
    /// GDB remote protocol listener port. Zero disables the listener.
    pub gdb_port: u16,
    /// Proprietary remote-debug protocol listener port. Zero disables it.
    pub rdbg_port: u16,
    pub debug_on_start: bool,
    pub debug_on_warn: bool,
    /// Disables real-time pacing entirely.
    pub turbo: bool,
    pub large_nand: bool,
    pub large_sdram: bool,
    pub boot_order: BootOrder,
    pub overrides: OverrideImages,
}

impl EmuConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open config at {:?}", path.as_ref()))?;
        let config: Self =
            serde_yaml::from_reader(f).context("Failed to parse session config YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.gdb_port != 0 && self.gdb_port == self.rdbg_port {
            anyhow::bail!(
                "gdb_port and rdbg_port must differ (both set to {})",
                self.gdb_port
            );
        }
        if let Some(path) = &self.storage_image {
            if path.as_os_str().is_empty() {
                anyhow::bail!("storage_image path cannot be empty");
            }
        }
        if let Some(path) = &self.boot_rom {
            if path.as_os_str().is_empty() {
                anyhow::bail!("boot_rom path cannot be empty");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let yaml = r#"
storage_image: "images/flash.img"
boot_rom: "images/boot1.bin"
gdb_port: 3333
turbo: true
boot_order: diags
overrides:
  os: "images/os-override.img"
"#;
        let config: EmuConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.boot_order, BootOrder::Diags);
        assert!(config.turbo);
        assert_eq!(config.gdb_port, 3333);
        assert_eq!(config.rdbg_port, 0);
        assert!(!config.overrides.is_empty());
        assert!(config.overrides.boot2.is_none());
    }

    #[test]
    fn test_defaults() {
        let config: EmuConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.boot_order, BootOrder::Default);
        assert!(config.storage_image.is_none());
        assert!(config.overrides.is_empty());
    }

    #[test]
    fn test_colliding_debug_ports() {
        let yaml = r#"
gdb_port: 4444
rdbg_port: 4444
"#;
        let config: EmuConfig = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn test_empty_storage_path() {
        let yaml = r#"
storage_image: ""
"#;
        let config: EmuConfig = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("storage_image"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = r#"
flash: "old-name.img"
"#;
        assert!(serde_yaml::from_str::<EmuConfig>(yaml).is_err());
    }
}

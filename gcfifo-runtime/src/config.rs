// Machine configuration
use anyhow::{Context, Result};
use gcfifo_core::error::{FifoError, FifoResult};
use gcfifo_core::memory::DEFAULT_RAM_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::hardware::fifo::CHUNK_SIZE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Run the GPU consumer on its own host thread.
    pub dual_core: bool,
    pub ram_size: u32,
    /// In dual-core mode, wait for the consumer before answering reads of
    /// the CP read pointer and distance registers.
    pub sync_on_register_read: bool,
    /// Upper bound on any CPU-side wait for the GPU thread. `None` blocks
    /// like the hardware does.
    pub stall_timeout_ms: Option<u64>,
    /// Ring applied to the CommandProcessor at power-on.
    pub initial_fifo: Option<FifoGeometry>,
}

/// CP ring geometry, in physical bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FifoGeometry {
    pub base: u32,
    pub end: u32,
    pub hi_watermark: u32,
    pub lo_watermark: u32,
}

impl FifoGeometry {
    pub fn capacity(&self) -> u32 {
        self.end.saturating_sub(self.base)
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            dual_core: false,
            ram_size: DEFAULT_RAM_SIZE,
            sync_on_register_read: true,
            stall_timeout_ms: None,
            initial_fifo: None,
        }
    }
}

impl MachineConfig {
    pub fn stall_timeout(&self) -> Option<Duration> {
        self.stall_timeout_ms.map(Duration::from_millis)
    }

    /// Reject geometry the machine cannot run with.
    pub fn validate(&self) -> FifoResult<()> {
        if self.ram_size == 0 || self.ram_size % CHUNK_SIZE != 0 {
            return Err(FifoError::config(format!(
                "RAM size 0x{:X} must be a non-zero multiple of {CHUNK_SIZE}",
                self.ram_size
            )));
        }
        let Some(fifo) = &self.initial_fifo else {
            return Ok(());
        };
        if fifo.base % CHUNK_SIZE != 0 || fifo.end % CHUNK_SIZE != 0 {
            return Err(FifoError::config(format!(
                "FIFO bounds 0x{:X}..0x{:X} must be {CHUNK_SIZE}-byte aligned",
                fifo.base, fifo.end
            )));
        }
        if fifo.end <= fifo.base {
            return Err(FifoError::config(format!(
                "FIFO end 0x{:X} must lie above base 0x{:X}",
                fifo.end, fifo.base
            )));
        }
        if fifo.end > self.ram_size {
            return Err(FifoError::config(format!(
                "FIFO end 0x{:X} exceeds RAM size 0x{:X}",
                fifo.end, self.ram_size
            )));
        }
        if fifo.hi_watermark > fifo.capacity() {
            return Err(FifoError::config(format!(
                "hi watermark 0x{:X} exceeds ring capacity 0x{:X}",
                fifo.hi_watermark,
                fifo.capacity()
            )));
        }
        if fifo.lo_watermark > fifo.hi_watermark {
            return Err(FifoError::config(format!(
                "lo watermark 0x{:X} is above hi watermark 0x{:X}",
                fifo.lo_watermark, fifo.hi_watermark
            )));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: MachineConfig =
            serde_json::from_str(&content).context("Failed to parse config file")?;
        config.validate().context("Invalid machine configuration")?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_fifo(base: u32, end: u32, hi: u32, lo: u32) -> MachineConfig {
        MachineConfig {
            initial_fifo: Some(FifoGeometry {
                base,
                end,
                hi_watermark: hi,
                lo_watermark: lo,
            }),
            ..MachineConfig::default()
        }
    }

    #[test]
    fn test_default_is_valid() {
        assert!(MachineConfig::default().validate().is_ok());
        assert!(with_fifo(0, 256, 128, 32).validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_geometry() {
        assert!(with_fifo(0x10, 0x100, 0, 0).validate().is_err());
        assert!(with_fifo(0x100, 0x100, 0, 0).validate().is_err());
        assert!(with_fifo(0, 0x100, 0x120, 0).validate().is_err());
        assert!(with_fifo(0, 0x100, 0x40, 0x60).validate().is_err());
        assert!(with_fifo(0, DEFAULT_RAM_SIZE + 0x20, 0, 0).validate().is_err());
    }

    #[test]
    fn test_rejects_unaligned_ram() {
        let config = MachineConfig {
            ram_size: 0x1001,
            ..MachineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(FifoError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: MachineConfig = serde_json::from_str(r#"{ "dual_core": true }"#).unwrap();
        assert!(config.dual_core);
        assert!(config.sync_on_register_read);
        assert_eq!(config.ram_size, DEFAULT_RAM_SIZE);
    }

    #[test]
    fn test_save_then_load() {
        let path = std::env::temp_dir().join(format!("gcfifo-config-{}.json", std::process::id()));
        let config = with_fifo(0x1000, 0x2000, 0x800, 0x100);
        config.save(&path).unwrap();
        assert_eq!(MachineConfig::load(&path).unwrap(), config);
        std::fs::remove_file(&path).ok();
    }
}

//! Save state system
//!
//! Register-level machine state: ring geometry and flags, CP control and
//! bounding box, PE registers and latches, PI cause/mask and FIFO pointers,
//! and the staged gather-pipe bytes. Guest RAM is not included.
//!
//! Snapshots are encoded with `bincode`, whose default fixed-width integer
//! encoding gives a fixed binary layout for the scalar fields.

use crate::hardware::command_processor::CpRegisters;
use crate::hardware::fifo::FifoRegisters;
use crate::hardware::pixel_engine::PeRegisters;
use crate::hardware::processor_interface::PiRegisters;
use anyhow::{Context, Result};
use gcfifo_core::error::{FifoError, FifoResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Bumped whenever the snapshot layout changes.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineSnapshot {
    pub version: u32,
    pub fifo: FifoRegisters,
    pub cp: CpRegisters,
    pub pe: PeRegisters,
    pub pi: PiRegisters,
    /// Bytes staged in the gather pipe, fewer than one chunk.
    pub gather_pipe: Vec<u8>,
}

impl MachineSnapshot {
    pub fn check_version(&self) -> FifoResult<()> {
        if self.version != SNAPSHOT_VERSION {
            return Err(FifoError::save_state(format!(
                "snapshot version {} is not supported (expected {SNAPSHOT_VERSION})",
                self.version
            )));
        }
        Ok(())
    }

    pub fn encode(&self) -> FifoResult<Vec<u8>> {
        bincode::serialize(self).map_err(|err| FifoError::save_state(err.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> FifoResult<Self> {
        let snapshot: MachineSnapshot =
            bincode::deserialize(bytes).map_err(|err| FifoError::save_state(err.to_string()))?;
        snapshot.check_version()?;
        Ok(snapshot)
    }

    /// Save to file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create save directory")?;
        }
        let data = self.encode().context("Failed to serialize save state")?;
        std::fs::write(path, data).context("Failed to write save state file")?;
        log::info!("save state written to {}", path.display());
        Ok(())
    }

    /// Load from file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).context("Failed to read save state file")?;
        let snapshot = Self::decode(&data).context("Failed to deserialize save state")?;
        log::info!("save state loaded from {}", path.display());
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MachineSnapshot {
        MachineSnapshot {
            version: SNAPSHOT_VERSION,
            fifo: FifoRegisters {
                end: 0x100,
                write_pointer: 0x40,
                distance: 0x40,
                read_enable: true,
                ..FifoRegisters::default()
            },
            cp: CpRegisters {
                control: 0x11,
                bounding_box: [1, 2, 3, 4],
            },
            pe: PeRegisters {
                token: 0x1234,
                token_latched: true,
                ..PeRegisters::default()
            },
            pi: PiRegisters {
                cause: 0x800,
                mask: 0x800,
                ..PiRegisters::default()
            },
            gather_pipe: vec![0x61, 0x48],
        }
    }

    #[test]
    fn test_scalar_layout_is_fixed_size() {
        let mut a = sample();
        let mut b = sample();
        a.fifo.write_pointer = 0;
        b.fifo.write_pointer = 0x03FF_FFE0;
        assert_eq!(a.encode().unwrap().len(), b.encode().unwrap().len());
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut snapshot = sample();
        snapshot.version = SNAPSHOT_VERSION + 1;
        let bytes = snapshot.encode().unwrap();
        assert!(matches!(
            MachineSnapshot::decode(&bytes),
            Err(FifoError::SaveState { .. })
        ));
    }

    #[test]
    fn test_rejects_truncated_data() {
        let bytes = sample().encode().unwrap();
        assert!(MachineSnapshot::decode(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("gcfifo-state-{}.gcsave", std::process::id()));
        let snapshot = sample();
        snapshot.save_to_file(&path).unwrap();
        assert_eq!(MachineSnapshot::load_from_file(&path).unwrap(), snapshot);
        std::fs::remove_file(&path).ok();
    }
}

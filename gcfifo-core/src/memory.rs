//! Guest Memory
//!
//! This module provides main RAM and the `MemoryBus` seam through which every
//! translated load and store reaches memory.
//!
//! # Memory Map
//! The emulated CPU issues effective addresses. The top three bits select a
//! segment (cached `0x80000000`, uncached `0xC0000000`), so stripping them
//! yields the physical address:
//! - **0x00000000 - RAM size**: Main RAM (24MB by default)
//! - **0x0C000000 - 0x0C00FFFF**: Hardware registers (CP, PE, PI) and the gather pipe
//!
//! # Endianness
//! The guest is big-endian. All multi-byte accessors convert between host
//! values and the big-endian wire format at this boundary, so callers never
//! swap by hand.

use crate::error::{FifoError, FifoResult};

/// Default main RAM size (24MB).
pub const DEFAULT_RAM_SIZE: u32 = 24 * 1024 * 1024;

/// Mask that strips the segment bits from an effective address.
pub const PHYSICAL_ADDRESS_MASK: u32 = 0x1FFF_FFFF;

/// Physical address of the write-gather pipe.
pub const GATHER_PIPE_ADDRESS: u32 = 0x0C00_8000;

/// Translate an effective address to a physical one.
#[inline(always)]
pub fn physical_address(address: u32) -> u32 {
    address & PHYSICAL_ADDRESS_MASK
}

/// Whether a store to `address` lands in the gather pipe.
///
/// The whole 4KB page is decoded as the pipe; some games store with
/// non-zero low bits and still expect the bytes to be gathered.
#[inline(always)]
pub fn is_gather_pipe(address: u32) -> bool {
    physical_address(address) & 0xFFFF_F000 == GATHER_PIPE_ADDRESS
}

/// Sized, big-endian access to guest memory.
///
/// Implemented by plain `Ram` and by the machine, which additionally routes
/// hardware-register windows and the gather pipe. Reads take `&mut self`
/// because an MMIO read may have to synchronise with the GPU side first.
pub trait MemoryBus {
    fn read_u8(&mut self, address: u32) -> FifoResult<u8>;
    fn read_u16(&mut self, address: u32) -> FifoResult<u16>;
    fn read_u32(&mut self, address: u32) -> FifoResult<u32>;
    fn write_u8(&mut self, address: u32, value: u8) -> FifoResult<()>;
    fn write_u16(&mut self, address: u32, value: u16) -> FifoResult<()>;
    fn write_u32(&mut self, address: u32, value: u32) -> FifoResult<()>;
}

/// Main RAM.
///
/// # Memory Layout
/// - `data`: backing bytes in guest (big-endian) order
///
/// # Address Space
/// Addresses are translated with [`physical_address`] before indexing, so
/// both the cached and uncached mirrors reach the same bytes.
#[derive(Debug, Clone)]
pub struct Ram {
    data: Vec<u8>,
}

impl Ram {
    /// Create 24MB of zeroed RAM.
    pub fn new() -> Self {
        Self::with_size(DEFAULT_RAM_SIZE)
    }

    /// Create zeroed RAM of `size` bytes.
    pub fn with_size(size: u32) -> Self {
        Self {
            data: vec![0u8; size as usize],
        }
    }

    /// RAM size in bytes.
    #[inline]
    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    /// Resolve `len` bytes at `address` to an index range, bounds-checked.
    #[inline(always)]
    fn range(&self, address: u32, len: usize) -> FifoResult<std::ops::Range<usize>> {
        let start: usize = physical_address(address) as usize;
        let end: usize = start + len;
        if end <= self.data.len() {
            Ok(start..end)
        } else {
            Err(FifoError::MemoryAccess {
                address,
                ram_size: self.size(),
            })
        }
    }

    /// Read a single byte.
    #[inline(always)]
    pub fn read_u8(&self, address: u32) -> FifoResult<u8> {
        let range = self.range(address, 1)?;
        Ok(self.data[range.start])
    }

    /// Read a big-endian 16-bit value.
    #[inline]
    pub fn read_u16(&self, address: u32) -> FifoResult<u16> {
        let range = self.range(address, 2)?;
        let mut bytes = [0u8; 2];
        bytes.copy_from_slice(&self.data[range]);
        Ok(u16::from_be_bytes(bytes))
    }

    /// Read a big-endian 32-bit value.
    #[inline]
    pub fn read_u32(&self, address: u32) -> FifoResult<u32> {
        let range = self.range(address, 4)?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.data[range]);
        Ok(u32::from_be_bytes(bytes))
    }

    /// Write a single byte.
    #[inline(always)]
    pub fn write_u8(&mut self, address: u32, value: u8) -> FifoResult<()> {
        let range = self.range(address, 1)?;
        self.data[range.start] = value;
        Ok(())
    }

    /// Write a 16-bit value in big-endian order.
    #[inline]
    pub fn write_u16(&mut self, address: u32, value: u16) -> FifoResult<()> {
        self.write_bytes(address, &value.to_be_bytes())
    }

    /// Write a 32-bit value in big-endian order.
    #[inline]
    pub fn write_u32(&mut self, address: u32, value: u32) -> FifoResult<()> {
        self.write_bytes(address, &value.to_be_bytes())
    }

    /// Copy raw guest bytes out of RAM.
    pub fn read_bytes(&self, address: u32, out: &mut [u8]) -> FifoResult<()> {
        let range = self.range(address, out.len())?;
        out.copy_from_slice(&self.data[range]);
        Ok(())
    }

    /// Copy raw guest bytes into RAM.
    pub fn write_bytes(&mut self, address: u32, bytes: &[u8]) -> FifoResult<()> {
        let range = self.range(address, bytes.len())?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }
}

impl Default for Ram {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus for Ram {
    fn read_u8(&mut self, address: u32) -> FifoResult<u8> {
        Ram::read_u8(self, address)
    }

    fn read_u16(&mut self, address: u32) -> FifoResult<u16> {
        Ram::read_u16(self, address)
    }

    fn read_u32(&mut self, address: u32) -> FifoResult<u32> {
        Ram::read_u32(self, address)
    }

    fn write_u8(&mut self, address: u32, value: u8) -> FifoResult<()> {
        Ram::write_u8(self, address, value)
    }

    fn write_u16(&mut self, address: u32, value: u16) -> FifoResult<()> {
        Ram::write_u16(self, address, value)
    }

    fn write_u32(&mut self, address: u32, value: u32) -> FifoResult<()> {
        Ram::write_u32(self, address, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirrors_reach_the_same_bytes() {
        let mut ram = Ram::with_size(0x1000);
        ram.write_u32(0x8000_0010, 0x1234_5678).unwrap();
        assert_eq!(ram.read_u32(0xC000_0010).unwrap(), 0x1234_5678);
        assert_eq!(ram.read_u32(0x0000_0010).unwrap(), 0x1234_5678);
    }

    #[test]
    fn values_are_stored_big_endian() {
        let mut ram = Ram::with_size(0x100);
        ram.write_u32(0, 0xAABB_CCDD).unwrap();
        assert_eq!(ram.read_u8(0).unwrap(), 0xAA);
        assert_eq!(ram.read_u8(3).unwrap(), 0xDD);
        assert_eq!(ram.read_u16(1).unwrap(), 0xBBCC);
    }

    #[test]
    fn out_of_bounds_is_an_error() {
        let ram = Ram::with_size(0x100);
        assert_eq!(
            ram.read_u32(0xFE),
            Err(FifoError::MemoryAccess {
                address: 0xFE,
                ram_size: 0x100
            })
        );
        assert!(ram.read_u8(0xFF).is_ok());
    }
}
